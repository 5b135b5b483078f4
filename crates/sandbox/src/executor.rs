//! The script worker.
//!
//! Each execution runs its interpreter on a freshly spawned task, so a
//! cancellation can hard-stop it. Enforcement is layered: the interpreter
//! checks the wall-clock deadline itself on a fixed step interval (tight
//! loops), and the executor aborts the task a grace period later (scripts
//! stuck inside a host call). Either way the outcome classifies as a
//! timeout.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use quasar_core::ExecutionLimits;
use quasar_script::{Bindings, Interpreter, Program, ScriptError, ScriptResult, ScriptValue};

/// Abort lag past the interpreter's own deadline. Long enough that the
/// interpreter normally reports the deadline itself (better message),
/// short enough to bound connection occupancy after a stuck host call.
const ABORT_GRACE: Duration = Duration::from_millis(250);

/// Run `program` to completion under `limits`.
///
/// Returns the script's terminal value; `Err(DeadlineExceeded)` covers
/// both the soft deadline and the hard abort, and external cancellation.
pub(crate) async fn run(
    program: Program,
    bindings: Bindings,
    limits: &ExecutionLimits,
    cancel: CancellationToken,
) -> ScriptResult<Option<ScriptValue>> {
    let deadline = Instant::now() + limits.wall_clock();

    let mut worker =
        tokio::spawn(async move { Interpreter::new(bindings, deadline).run(&program).await });

    let outcome = tokio::select! {
        outcome = &mut worker => outcome,
        () = cancel.cancelled() => {
            tracing::debug!("execution cancelled, aborting worker");
            worker.abort();
            let _ = worker.await;
            return Err(ScriptError::DeadlineExceeded);
        }
        () = tokio::time::sleep_until((deadline + ABORT_GRACE).into()) => {
            tracing::warn!("worker outlived its deadline, aborting");
            worker.abort();
            let _ = worker.await;
            return Err(ScriptError::DeadlineExceeded);
        }
    };

    match outcome {
        Ok(result) => result,
        Err(join_err) if join_err.is_cancelled() => Err(ScriptError::DeadlineExceeded),
        Err(join_err) => {
            tracing::error!(error = %join_err, "script worker panicked");
            Err(ScriptError::runtime("script worker crashed"))
        }
    }
}
