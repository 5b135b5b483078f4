//! The structured outcome of one successful script run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Captured output and terminal value of a completed execution.
///
/// Immutable once produced. Callers conventionally treat the last log line
/// as a convenience summary, but the terminal value, when present, is the
/// canonical result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Log lines in emission order, one per console call.
    pub logs: Vec<String>,
    /// The script's explicit return value, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ExecutionResult {
    /// An empty, successful result.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            logs: Vec::new(),
            value: None,
        }
    }

    /// The conventional summary: the last log line, if any.
    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        self.logs.last().map(String::as_str)
    }
}
