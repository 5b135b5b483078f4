//! Classified execution failures.
//!
//! Every failure the sandbox surfaces carries one of the codes below, a
//! human-readable message, and whatever log output the script managed to
//! emit before failing. The code set is the caller-facing contract; new
//! failure modes must map onto it rather than invent ad-hoc strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Identifier or configuration failed domain validation.
    Validation,
    /// The instance id does not resolve to a registered instance.
    InstanceNotFound,
    /// The instance type is outside the supported set.
    UnsupportedInstanceType,
    /// A scope hint names an invalid database or collection.
    InvalidScope,
    /// The per-instance pool stayed exhausted past the acquire timeout.
    PoolExhausted,
    /// A connection could not be established (after the one internal retry).
    ConnectionFailed,
    /// The script exceeded its wall-clock limit or was cancelled.
    Timeout,
    /// The script threw: type errors, bad arguments, database errors.
    RuntimeError,
    /// Captured output grew past the configured ceiling.
    OutputLimitExceeded,
    /// The script reached for something outside its capability binding.
    SandboxViolation,
}

impl ErrorCode {
    /// Whether the sandbox may transparently retry the failed step.
    ///
    /// Script-level failures are never retried: a script with side effects
    /// could duplicate writes.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::ConnectionFailed)
    }

    /// Stable wire name of this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::InstanceNotFound => "INSTANCE_NOT_FOUND",
            Self::UnsupportedInstanceType => "UNSUPPORTED_INSTANCE_TYPE",
            Self::InvalidScope => "INVALID_SCOPE",
            Self::PoolExhausted => "POOL_EXHAUSTED",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::RuntimeError => "RUNTIME_ERROR",
            Self::OutputLimitExceeded => "OUTPUT_LIMIT_EXCEEDED",
            Self::SandboxViolation => "SANDBOX_VIOLATION",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified execution failure, surfaced verbatim to the caller.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ExecutionError {
    /// Which failure class this is.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Log lines the script emitted before the failure, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

impl ExecutionError {
    /// Create an error with no captured output.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            logs: Vec::new(),
        }
    }

    /// Attach the partial log output captured before the failure.
    #[must_use]
    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }

    /// Whether the sandbox may transparently retry the failed step.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}
