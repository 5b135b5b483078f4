//! Console capture.
//!
//! One [`LogSink`] exists per execution; the `console` host object is the
//! only writer. Limits are enforced at the sink so an over-chatty script
//! fails the moment it crosses the ceiling, with everything captured so
//! far preserved for the error envelope.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use quasar_core::ExecutionLimits;
use quasar_script::{HostObject, ScriptError, ScriptResult, ScriptValue};

struct SinkState {
    lines: Vec<String>,
    bytes: usize,
}

/// Ordered, size-bounded capture of a script's console output.
pub struct LogSink {
    max_output_bytes: usize,
    max_log_lines: usize,
    state: Mutex<SinkState>,
}

impl LogSink {
    /// A sink sized from the execution limits.
    #[must_use]
    pub fn new(limits: &ExecutionLimits) -> Self {
        Self {
            max_output_bytes: limits.max_output_bytes,
            max_log_lines: limits.max_log_lines,
            state: Mutex::new(SinkState {
                lines: Vec::new(),
                bytes: 0,
            }),
        }
    }

    /// Append a line, enforcing the line and byte ceilings.
    pub fn push(&self, line: String) -> ScriptResult<()> {
        let mut state = self.state.lock();
        if state.lines.len() >= self.max_log_lines {
            return Err(ScriptError::OutputLimit(format!(
                "more than {} log lines",
                self.max_log_lines
            )));
        }
        if state.bytes + line.len() > self.max_output_bytes {
            return Err(ScriptError::OutputLimit(format!(
                "captured output exceeds {} bytes",
                self.max_output_bytes
            )));
        }
        state.bytes += line.len();
        state.lines.push(line);
        Ok(())
    }

    /// The captured lines, in emission order.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.state.lock().lines.clone()
    }

    /// Bytes captured so far.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.state.lock().bytes
    }
}

/// The `console` binding.
pub struct ConsoleHandle {
    sink: Arc<LogSink>,
}

impl ConsoleHandle {
    /// A console writing into `sink`.
    #[must_use]
    pub fn new(sink: Arc<LogSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl HostObject for ConsoleHandle {
    fn kind(&self) -> &'static str {
        "console"
    }

    async fn call_method(&self, method: &str, args: Vec<ScriptValue>) -> ScriptResult<ScriptValue> {
        match method {
            // each call becomes one line; arguments join with a space
            "log" | "info" | "warn" | "error" | "debug" => {
                let line = args
                    .iter()
                    .map(ScriptValue::render)
                    .collect::<Vec<_>>()
                    .join(" ");
                self.sink.push(line)?;
                Ok(ScriptValue::Null)
            }
            other => Err(ScriptError::runtime(format!(
                "console.{other} is not a function"
            ))),
        }
    }
}
