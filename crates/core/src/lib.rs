//! # Quasar Core
//!
//! Shared domain types for the Quasar script execution sandbox: managed
//! instance descriptions, execution requests and limits, the classified
//! error taxonomy, and the instance directory boundary.
//!
//! This crate has zero internal crate dependencies and defines the
//! canonical types used across all other quasar-* crates.

pub mod directory;
pub mod error;
pub mod instance;
pub mod limits;
pub mod name;
pub mod request;
pub mod result;

pub use directory::{InstanceDirectory, MemoryDirectory};
pub use error::{ErrorCode, ExecutionError};
pub use instance::{ConnectionDescriptor, Instance, InstanceId, InstanceKind};
pub use limits::ExecutionLimits;
pub use request::{ExecutionRequest, ScopeHint};
pub use result::ExecutionResult;
