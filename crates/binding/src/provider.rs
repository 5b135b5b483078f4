//! Pool integration: a [`Provider`] that opens scoped connections through a
//! [`ConnectionFactory`], plus the driver-dispatching factory.

use std::sync::Arc;

use async_trait::async_trait;

use quasar_core::{Instance, InstanceKind};
use quasar_resource::{PoolError, PoolResult, Provider};

use crate::connection::{ConnectionFactory, ScopedConnection};
use crate::error::ConnectorError;

/// Connection lifecycle for one instance's pool.
pub struct ConnectionProvider {
    instance: Instance,
    factory: Arc<dyn ConnectionFactory>,
    label: String,
}

impl ConnectionProvider {
    /// Create a provider for `instance` backed by `factory`.
    #[must_use]
    pub fn new(instance: Instance, factory: Arc<dyn ConnectionFactory>) -> Self {
        let label = instance.id.to_string();
        Self {
            instance,
            factory,
            label,
        }
    }

    /// The instance this provider connects to.
    #[must_use]
    pub const fn instance(&self) -> &Instance {
        &self.instance
    }
}

#[async_trait]
impl Provider for ConnectionProvider {
    type Conn = ScopedConnection;

    fn id(&self) -> &str {
        &self.label
    }

    async fn create(&self) -> PoolResult<ScopedConnection> {
        self.factory.connect(&self.instance).await.map_err(|err| {
            PoolError::create_failed(&self.label, err.to_string(), err.is_transient())
        })
    }

    async fn validate(&self, conn: &ScopedConnection) -> bool {
        conn.ping().await
    }

    async fn recycle(&self, conn: &mut ScopedConnection) -> PoolResult<()> {
        // a script may have opened a transaction and died before closing it
        if let ScopedConnection::Sql(sql) = conn {
            if sql.in_transaction() {
                tracing::debug!(pool = %self.label, "rolling back abandoned transaction");
                sql.rollback().await.map_err(|err| {
                    PoolError::create_failed(&self.label, err.to_string(), false)
                })?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProvider")
            .field("instance", &self.label)
            .field("kind", &self.instance.kind)
            .finish()
    }
}

/// Dispatches to whichever drivers this build was compiled with.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverFactory;

impl DriverFactory {
    /// A factory over the compiled-in drivers.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionFactory for DriverFactory {
    async fn connect(&self, instance: &Instance) -> Result<ScopedConnection, ConnectorError> {
        match instance.kind {
            InstanceKind::Postgres => {
                #[cfg(feature = "postgres")]
                {
                    crate::postgres::connect(instance).await
                }
                #[cfg(not(feature = "postgres"))]
                {
                    Err(ConnectorError::DriverUnavailable(instance.kind.as_str()))
                }
            }
            InstanceKind::Mongodb => {
                #[cfg(feature = "mongodb")]
                {
                    crate::mongo::connect(instance).await
                }
                #[cfg(not(feature = "mongodb"))]
                {
                    Err(ConnectorError::DriverUnavailable(instance.kind.as_str()))
                }
            }
        }
    }
}
