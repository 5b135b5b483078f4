//! Connection traits and the scoped connection handed to one execution.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use quasar_core::Instance;

use crate::error::ConnectorError;

/// Result of one SQL statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlOutcome {
    /// Returned rows as column-name → value maps.
    pub rows: Vec<Value>,
    /// Rows affected by writes.
    pub rows_affected: u64,
}

/// One SQL connection dedicated to one execution.
///
/// The dedicated connection is what makes `begin`/`commit`/`rollback`
/// meaningful: every statement of the execution runs on it.
#[async_trait]
pub trait SqlConnection: Send + Sync {
    /// Run a parameterized statement.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<SqlOutcome, ConnectorError>;

    /// Open a transaction.
    async fn begin(&self) -> Result<(), ConnectorError>;

    /// Commit the open transaction.
    async fn commit(&self) -> Result<(), ConnectorError>;

    /// Roll back the open transaction.
    async fn rollback(&self) -> Result<(), ConnectorError>;

    /// Whether a transaction is currently open (used on recycle).
    fn in_transaction(&self) -> bool;

    /// Cheap liveness probe.
    async fn ping(&self) -> bool;
}

/// One document-store session dedicated to one execution.
#[async_trait]
pub trait DocumentConnection: Send + Sync {
    /// Find documents matching `filter`, in stored order.
    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Value,
        limit: Option<u64>,
    ) -> Result<Vec<Value>, ConnectorError>;

    /// Insert documents; returns how many were inserted.
    async fn insert(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Value>,
    ) -> Result<u64, ConnectorError>;

    /// Update matching documents; returns how many were modified.
    async fn update(
        &self,
        database: &str,
        collection: &str,
        filter: Value,
        update: Value,
        multi: bool,
    ) -> Result<u64, ConnectorError>;

    /// Delete matching documents; returns how many were removed.
    async fn delete(
        &self,
        database: &str,
        collection: &str,
        filter: Value,
        multi: bool,
    ) -> Result<u64, ConnectorError>;

    /// Count matching documents.
    async fn count(
        &self,
        database: &str,
        collection: &str,
        filter: Value,
    ) -> Result<u64, ConnectorError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> bool;
}

/// The pooled connection a script execution holds.
///
/// Host objects clone the inner `Arc`; when the execution's worker task
/// ends (or is aborted) those clones drop, and the pool guard returns the
/// connection.
#[derive(Clone)]
pub enum ScopedConnection {
    /// A dedicated SQL connection.
    Sql(Arc<dyn SqlConnection>),
    /// A document-store session.
    Document(Arc<dyn DocumentConnection>),
}

impl ScopedConnection {
    /// Which family of connection this is.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Sql(_) => "sql",
            Self::Document(_) => "document",
        }
    }

    /// Liveness probe, dispatched to the driver.
    pub async fn ping(&self) -> bool {
        match self {
            Self::Sql(conn) => conn.ping().await,
            Self::Document(conn) => conn.ping().await,
        }
    }
}

impl std::fmt::Debug for ScopedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ScopedConnection")
            .field(&self.kind_name())
            .finish()
    }
}

/// Opens scoped connections for instances.
///
/// Implementations hold driver configuration; the [`MemoryFactory`] backs
/// tests, [`DriverFactory`] dispatches to compiled-in drivers.
///
/// [`MemoryFactory`]: crate::memory::MemoryFactory
/// [`DriverFactory`]: crate::provider::DriverFactory
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Open a fresh connection for `instance`.
    async fn connect(&self, instance: &Instance) -> Result<ScopedConnection, ConnectorError>;
}
