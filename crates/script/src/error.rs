//! Script-level failures.
//!
//! The variants deliberately mirror how the sandbox classifies them:
//! `Syntax` and `Runtime` surface as script failures, `UnknownBinding` as a
//! sandbox violation, `OutputLimit` and `DeadlineExceeded` as their own
//! classes. Host objects return these directly so classification survives
//! the trip through the evaluator.

use thiserror::Error;

/// Result alias for script operations.
pub type ScriptResult<T> = Result<T, ScriptError>;

/// A failure raised while parsing or running a script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// The source does not parse.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// The script threw at runtime (type errors, bad arguments, database
    /// errors surfaced by a host object).
    #[error("{0}")]
    Runtime(String),

    /// The script referenced a name outside its capability binding.
    #[error("'{0}' is not available in this sandbox")]
    UnknownBinding(String),

    /// Captured output grew past the configured ceiling.
    #[error("output limit exceeded: {0}")]
    OutputLimit(String),

    /// The evaluator crossed the execution deadline.
    #[error("script deadline exceeded")]
    DeadlineExceeded,
}

impl ScriptError {
    /// A syntax error.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax(message.into())
    }

    /// A runtime error.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }
}
