//! # Quasar Binding
//!
//! The capability binding layer: everything a script may see of a database
//! is built here. A [`CapabilityBinding`] is the type-tagged plan for one
//! execution (Postgres or MongoDB, scoped to one database); materializing
//! it installs the host objects (`query`, `client`, `db`, `collection`)
//! that dispatch through the [`connection`] traits. Credentials and driver
//! state live behind those traits and never reach the script.
//!
//! Production connectors are feature-gated (`postgres` via sqlx, `mongodb`
//! via the official driver); the [`memory`] connectors are always compiled
//! and back the test suite and local development.

pub mod capability;
pub mod connection;
pub mod error;
pub mod hosts;
pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod provider;

pub use capability::CapabilityBinding;
pub use connection::{
    ConnectionFactory, DocumentConnection, ScopedConnection, SqlConnection, SqlOutcome,
};
pub use error::ConnectorError;
pub use memory::MemoryFactory;
pub use provider::{ConnectionProvider, DriverFactory};
