//! Connector-level failures.

use thiserror::Error;

/// A failure inside a database connector.
#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    /// The connection could not be established.
    #[error("failed to connect: {reason}")]
    Connect {
        /// Driver-level description.
        reason: String,
        /// Whether a prompt retry has a chance of succeeding.
        transient: bool,
    },

    /// A statement or operation failed. Surfaced to the script verbatim as
    /// a runtime error and never retried, since the statement may have had
    /// side effects.
    #[error("{0}")]
    Query(String),

    /// This build was compiled without the needed driver.
    #[error("support for {0} instances is not compiled into this build")]
    DriverUnavailable(&'static str),
}

impl ConnectorError {
    /// A connection-establishment failure.
    pub fn connect(reason: impl Into<String>, transient: bool) -> Self {
        Self::Connect {
            reason: reason.into(),
            transient,
        }
    }

    /// An operation failure.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }

    /// Whether retrying once, promptly, might succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Connect { transient: true, .. })
    }
}
