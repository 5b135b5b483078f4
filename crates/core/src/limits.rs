//! Per-execution resource limits.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{ErrorCode, ExecutionError};

/// Limits applied to a single script execution.
///
/// Recognized options:
/// - `wall_clock_ms`: abort execution past this duration;
/// - `max_output_bytes`: abort if captured output exceeds this;
/// - `max_log_lines`: cap on retained log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Wall-clock budget in milliseconds.
    pub wall_clock_ms: u64,
    /// Ceiling on captured output (log lines plus the serialized terminal
    /// value), in bytes.
    pub max_output_bytes: usize,
    /// Maximum number of retained log entries.
    pub max_log_lines: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            wall_clock_ms: 5_000,
            max_output_bytes: 256 * 1024,
            max_log_lines: 1_000,
        }
    }
}

impl ExecutionLimits {
    /// The wall-clock budget as a [`Duration`].
    #[must_use]
    pub const fn wall_clock(&self) -> Duration {
        Duration::from_millis(self.wall_clock_ms)
    }

    /// Validate the limits, returning a classified error if invalid.
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.wall_clock_ms == 0 {
            return Err(ExecutionError::new(
                ErrorCode::Validation,
                "wall_clock_ms must be greater than 0",
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(ExecutionError::new(
                ErrorCode::Validation,
                "max_output_bytes must be greater than 0",
            ));
        }
        if self.max_log_lines == 0 {
            return Err(ExecutionError::new(
                ErrorCode::Validation,
                "max_log_lines must be greater than 0",
            ));
        }
        Ok(())
    }
}
