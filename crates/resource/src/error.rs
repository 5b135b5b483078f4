//! Error types for connection pooling.

use thiserror::Error;

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// A pooling failure.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// Pool configuration is invalid.
    #[error("invalid pool configuration: {0}")]
    Configuration(String),

    /// Every slot stayed checked out past the acquire timeout.
    #[error("pool '{pool}' exhausted: {active}/{max} connections in use after {waited_ms}ms")]
    Exhausted {
        /// Pool label (typically the instance id).
        pool: String,
        /// Connections currently checked out.
        active: usize,
        /// Configured maximum.
        max: usize,
        /// How long the acquire waited.
        waited_ms: u64,
    },

    /// A fresh connection could not be established.
    #[error("failed to open connection for '{pool}': {reason}")]
    CreateFailed {
        /// Pool label.
        pool: String,
        /// Driver-level failure description.
        reason: String,
        /// Whether a prompt retry has a chance of succeeding.
        transient: bool,
    },
}

impl PoolError {
    /// Invalid-configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Connection-establishment failure.
    pub fn create_failed(pool: impl Into<String>, reason: impl Into<String>, transient: bool) -> Self {
        Self::CreateFailed {
            pool: pool.into(),
            reason: reason.into(),
            transient,
        }
    }

    /// Whether retrying once, promptly, might succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::CreateFailed { transient: true, .. })
    }
}
