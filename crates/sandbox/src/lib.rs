//! # Quasar Sandbox
//!
//! The execution pipeline: resolve the instance, build its capability
//! binding, acquire a scoped connection from the per-instance pool, run
//! the script on an abortable worker under wall-clock and output limits,
//! normalize the outcome, and release the connection. In that order, on
//! every path.
//!
//! ```text
//! request ──▶ validate ──▶ build binding ──▶ acquire ──▶ execute ──▶ normalize
//!                              │                │            │
//!                        InvalidScope      PoolExhausted  Timeout / RuntimeError /
//!                     UnsupportedType   ConnectionFailed  OutputLimit / Violation
//! ```
//!
//! Failures are classified ([`quasar_core::ErrorCode`]) and carry whatever
//! log output the script emitted first. Script-level failures are never
//! retried; only a transient connection-acquire failure gets one internal
//! retry, before anything has run.

pub mod console;
mod executor;
pub mod normalize;

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use quasar_binding::{CapabilityBinding, ConnectionFactory, ConnectionProvider};
use quasar_core::{
    ErrorCode, ExecutionError, ExecutionLimits, ExecutionRequest, ExecutionResult, Instance,
    InstanceDirectory, InstanceId,
};
use quasar_resource::{Pool, PoolConfig, PoolError, PoolSet, PoolStats};
use quasar_script::{Bindings, ScriptError, ScriptValue};

use console::{ConsoleHandle, LogSink};

/// Sandbox-wide configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Per-execution limits.
    pub limits: ExecutionLimits,
    /// Pool timing defaults; per-instance `max_connections` overrides the
    /// size.
    pub pool: PoolConfig,
}

impl SandboxConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ExecutionError> {
        self.limits.validate()?;
        self.pool
            .validate()
            .map_err(|err| ExecutionError::new(ErrorCode::Validation, err.to_string()))
    }
}

/// The script execution sandbox.
///
/// One sandbox serves many concurrent executions; per-instance pools are
/// the only state shared between them.
pub struct Sandbox {
    directory: Arc<dyn InstanceDirectory>,
    factory: Arc<dyn ConnectionFactory>,
    pools: PoolSet<InstanceId, ConnectionProvider>,
    config: SandboxConfig,
}

impl Sandbox {
    /// A sandbox with default configuration.
    #[must_use]
    pub fn new(directory: Arc<dyn InstanceDirectory>, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self::with_config(directory, factory, SandboxConfig::default())
    }

    /// A sandbox with explicit configuration.
    #[must_use]
    pub fn with_config(
        directory: Arc<dyn InstanceDirectory>,
        factory: Arc<dyn ConnectionFactory>,
        config: SandboxConfig,
    ) -> Self {
        Self {
            directory,
            factory,
            pools: PoolSet::new(),
            config,
        }
    }

    /// Execute a script request to completion.
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, ExecutionError> {
        self.execute_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Execute a script request, stopping early if `cancel` fires.
    ///
    /// Cancellation terminates the worker and releases the connection
    /// exactly once; the outcome classifies as [`ErrorCode::Timeout`].
    pub async fn execute_with_cancellation(
        &self,
        request: &ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ExecutionError> {
        // Fail-fast phase: nothing below acquires a connection.
        self.config.validate()?;
        let instance = self.directory.resolve(request.instance_id).await?;
        let binding = CapabilityBinding::build(&instance, &request.scope)?;
        let program = quasar_script::parse(&request.script)
            .map_err(|err| ExecutionError::new(ErrorCode::RuntimeError, err.to_string()))?;

        tracing::debug!(
            instance = %instance.id,
            kind = %instance.kind,
            script_bytes = request.script.len(),
            "executing script"
        );

        // Scope phase: one pooled connection for the whole execution.
        let pool = self.pool_for(&instance)?;
        let guard = self.acquire_with_retry(&pool).await?;

        // Capability phase: this execution's bindings, and nothing else.
        let sink = Arc::new(LogSink::new(&self.config.limits));
        let mut bindings = Bindings::new();
        binding.install(&guard, &mut bindings)?;
        bindings.insert(
            "console",
            ScriptValue::Handle(Arc::new(ConsoleHandle::new(Arc::clone(&sink)))),
        );

        // Run phase.
        let outcome = executor::run(program, bindings, &self.config.limits, cancel).await;

        // Release phase: host handles died with the worker; dropping the
        // guard returns the connection to the pool.
        drop(guard);

        match outcome {
            Ok(value) => {
                normalize::normalize(sink.lines(), value.as_ref(), &self.config.limits, sink.bytes())
            }
            Err(err) => Err(classify(err).with_logs(sink.lines())),
        }
    }

    /// Pool statistics for an instance, if its pool exists.
    #[must_use]
    pub fn pool_stats(&self, instance_id: InstanceId) -> Option<PoolStats> {
        self.pools.get(&instance_id).map(|pool| pool.stats())
    }

    /// Destroy all idle pooled connections.
    pub async fn shutdown(&self) {
        self.pools.shutdown().await;
    }

    fn pool_for(&self, instance: &Instance) -> Result<Pool<ConnectionProvider>, ExecutionError> {
        let factory = Arc::clone(&self.factory);
        let pool_config = self
            .config
            .pool
            .clone()
            .with_max_size(instance.connection.max_connections);
        let instance = instance.clone();

        self.pools
            .get_or_create(instance.id, move || {
                instance
                    .connection
                    .validate()
                    .map_err(|err| PoolError::configuration(err.message.clone()))?;
                Pool::new(ConnectionProvider::new(instance, factory), pool_config)
            })
            .map_err(map_pool_error)
    }

    async fn acquire_with_retry(
        &self,
        pool: &Pool<ConnectionProvider>,
    ) -> Result<quasar_resource::PoolGuard<quasar_binding::ScopedConnection>, ExecutionError> {
        match pool.acquire().await {
            Ok(guard) => Ok(guard),
            Err(err) if err.is_transient() => {
                tracing::debug!(error = %err, "transient acquire failure, retrying once");
                pool.acquire().await.map_err(map_pool_error)
            }
            Err(err) => Err(map_pool_error(err)),
        }
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("pools", &self.pools)
            .field("config", &self.config)
            .finish()
    }
}

fn map_pool_error(err: PoolError) -> ExecutionError {
    let code = match &err {
        PoolError::Exhausted { .. } => ErrorCode::PoolExhausted,
        PoolError::CreateFailed { .. } => ErrorCode::ConnectionFailed,
        PoolError::Configuration(_) => ErrorCode::Validation,
    };
    ExecutionError::new(code, err.to_string())
}

/// Map a script failure onto the caller-facing taxonomy.
fn classify(err: ScriptError) -> ExecutionError {
    let code = match &err {
        ScriptError::Syntax(_) | ScriptError::Runtime(_) => ErrorCode::RuntimeError,
        ScriptError::UnknownBinding(_) => ErrorCode::SandboxViolation,
        ScriptError::OutputLimit(_) => ErrorCode::OutputLimitExceeded,
        ScriptError::DeadlineExceeded => ErrorCode::Timeout,
    };
    ExecutionError::new(code, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_errors_classify_onto_the_taxonomy() {
        assert_eq!(
            classify(ScriptError::runtime("boom")).code,
            ErrorCode::RuntimeError
        );
        assert_eq!(
            classify(ScriptError::UnknownBinding("require".into())).code,
            ErrorCode::SandboxViolation
        );
        assert_eq!(
            classify(ScriptError::OutputLimit("too much".into())).code,
            ErrorCode::OutputLimitExceeded
        );
        assert_eq!(
            classify(ScriptError::DeadlineExceeded).code,
            ErrorCode::Timeout
        );
    }

    #[test]
    fn default_config_is_valid() {
        assert!(SandboxConfig::default().validate().is_ok());
    }
}
