//! # Quasar Resource
//!
//! Connection scope management: a scoped connection is a pooled database
//! connection whose lifetime is tied to exactly one script execution. The
//! [`Pool`] bounds how many exist per instance, health-checks idle entries
//! before reuse, and hands out RAII [`PoolGuard`]s that guarantee exactly
//! one release per acquire on every exit path: normal completion, script
//! error, timeout, or task abort.

pub mod error;
pub mod guard;
pub mod pool;
pub mod provider;
pub mod set;

pub use error::{PoolError, PoolResult};
pub use guard::PoolGuard;
pub use pool::{Pool, PoolConfig, PoolStats};
pub use provider::Provider;
pub use set::PoolSet;
