//! Result normalization.
//!
//! Pure: turns captured lines plus the script's terminal value into the
//! caller-facing envelope. Serialization can shrink but never crash; a
//! host handle in the return value becomes an opaque placeholder. The one
//! failure mode is the output ceiling, which counts the serialized
//! terminal value against the same budget as the logs.

use quasar_core::{ErrorCode, ExecutionError, ExecutionLimits, ExecutionResult};
use quasar_script::ScriptValue;

/// Build the result envelope for a completed execution.
pub fn normalize(
    logs: Vec<String>,
    value: Option<&ScriptValue>,
    limits: &ExecutionLimits,
    log_bytes: usize,
) -> Result<ExecutionResult, ExecutionError> {
    let value = value.map(ScriptValue::to_json);

    let value_bytes = value
        .as_ref()
        .map_or(0, |v| v.to_string().len());
    if log_bytes + value_bytes > limits.max_output_bytes {
        return Err(ExecutionError::new(
            ErrorCode::OutputLimitExceeded,
            format!(
                "result of {value_bytes} bytes pushes captured output past {} bytes",
                limits.max_output_bytes
            ),
        )
        .with_logs(logs));
    }

    Ok(ExecutionResult { logs, value })
}
