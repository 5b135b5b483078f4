//! In-memory connectors.
//!
//! These back the test suite and local development: a SQL connector that
//! replays seeded results per statement text, and a document store with
//! real (if minimal) find/insert/update/delete semantics. Both support the
//! failure and latency injection the sandbox tests need, and track how
//! many connections are open so pool-bound properties can be asserted.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use quasar_core::Instance;

use crate::connection::{
    ConnectionFactory, DocumentConnection, ScopedConnection, SqlConnection, SqlOutcome,
};
use crate::error::ConnectorError;

#[derive(Default)]
struct Shared {
    /// Statement text → canned outcome.
    sql_results: Mutex<HashMap<String, SqlOutcome>>,
    /// Statements executed, in order, across all connections.
    executed: Mutex<Vec<String>>,
    /// (database, collection) → documents in insertion order.
    collections: Mutex<HashMap<(String, String), Vec<Value>>>,
    /// Injected latency per database operation.
    op_delay: Mutex<Option<Duration>>,
    /// Remaining connect attempts that fail.
    connect_failures: AtomicU64,
    /// When set, every ping fails (simulates broken connections).
    broken: AtomicBool,
    /// Currently open connections.
    open: AtomicUsize,
    /// High-water mark of concurrently open connections.
    max_open: AtomicUsize,
}

impl Shared {
    async fn simulate_latency(&self) {
        let delay = *self.op_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Factory for in-memory connections, with seeding and fault injection.
#[derive(Clone, Default)]
pub struct MemoryFactory {
    shared: Arc<Shared>,
}

impl MemoryFactory {
    /// An empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the result of a SQL statement (rows; `rows_affected` = row
    /// count). Unseeded statements return an empty result.
    #[must_use]
    pub fn with_sql_rows(self, sql: impl Into<String>, rows: Vec<Value>) -> Self {
        let outcome = SqlOutcome {
            rows_affected: rows.len() as u64,
            rows,
        };
        self.shared.sql_results.lock().insert(sql.into(), outcome);
        self
    }

    /// Seed a write statement's affected-row count.
    #[must_use]
    pub fn with_sql_affected(self, sql: impl Into<String>, rows_affected: u64) -> Self {
        self.shared.sql_results.lock().insert(
            sql.into(),
            SqlOutcome {
                rows: Vec::new(),
                rows_affected,
            },
        );
        self
    }

    /// Seed a collection with documents, preserving order.
    #[must_use]
    pub fn with_collection(
        self,
        database: impl Into<String>,
        collection: impl Into<String>,
        docs: Vec<Value>,
    ) -> Self {
        self.shared
            .collections
            .lock()
            .insert((database.into(), collection.into()), docs);
        self
    }

    /// Inject latency into every database operation.
    #[must_use]
    pub fn with_op_delay(self, delay: Duration) -> Self {
        *self.shared.op_delay.lock() = Some(delay);
        self
    }

    /// Make the next `n` connect attempts fail (transiently).
    #[must_use]
    pub fn with_connect_failures(self, n: u64) -> Self {
        self.shared.connect_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Mark every open connection broken: pings fail until cleared.
    pub fn set_broken(&self, broken: bool) {
        self.shared.broken.store(broken, Ordering::SeqCst);
    }

    /// Statements executed so far, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.shared.executed.lock().clone()
    }

    /// Documents currently in a collection.
    #[must_use]
    pub fn documents(&self, database: &str, collection: &str) -> Vec<Value> {
        self.shared
            .collections
            .lock()
            .get(&(database.to_string(), collection.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Connections open right now.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// The most connections ever open at once.
    #[must_use]
    pub fn max_open_connections(&self) -> usize {
        self.shared.max_open.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MemoryFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFactory")
            .field("open", &self.open_connections())
            .finish()
    }
}

#[async_trait]
impl ConnectionFactory for MemoryFactory {
    async fn connect(&self, instance: &Instance) -> Result<ScopedConnection, ConnectorError> {
        let remaining = self.shared.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.shared
                .connect_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(ConnectorError::connect("injected connect failure", true));
        }

        let open = self.shared.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_open.fetch_max(open, Ordering::SeqCst);

        let conn = MemoryConnection {
            shared: Arc::clone(&self.shared),
            in_transaction: AtomicBool::new(false),
        };

        match instance.kind {
            quasar_core::InstanceKind::Postgres => Ok(ScopedConnection::Sql(Arc::new(conn))),
            quasar_core::InstanceKind::Mongodb => Ok(ScopedConnection::Document(Arc::new(conn))),
        }
    }
}

/// One in-memory connection; serves both connector traits.
struct MemoryConnection {
    shared: Arc<Shared>,
    in_transaction: AtomicBool,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shared.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SqlConnection for MemoryConnection {
    async fn query(&self, sql: &str, _params: &[Value]) -> Result<SqlOutcome, ConnectorError> {
        self.shared.simulate_latency().await;
        self.shared.executed.lock().push(sql.to_string());
        let outcome = self
            .shared
            .sql_results
            .lock()
            .get(sql)
            .cloned()
            .unwrap_or_default();
        Ok(outcome)
    }

    async fn begin(&self) -> Result<(), ConnectorError> {
        if self.in_transaction.swap(true, Ordering::SeqCst) {
            return Err(ConnectorError::query("transaction already open"));
        }
        self.shared.executed.lock().push("BEGIN".to_string());
        Ok(())
    }

    async fn commit(&self) -> Result<(), ConnectorError> {
        if !self.in_transaction.swap(false, Ordering::SeqCst) {
            return Err(ConnectorError::query("no open transaction"));
        }
        self.shared.executed.lock().push("COMMIT".to_string());
        Ok(())
    }

    async fn rollback(&self) -> Result<(), ConnectorError> {
        if !self.in_transaction.swap(false, Ordering::SeqCst) {
            return Err(ConnectorError::query("no open transaction"));
        }
        self.shared.executed.lock().push("ROLLBACK".to_string());
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> bool {
        !self.shared.broken.load(Ordering::SeqCst)
    }
}

/// Subset match: every key in `filter` must equal the document's value.
/// An empty filter matches everything.
fn matches_filter(doc: &Value, filter: &Value) -> bool {
    let Value::Object(filter) = filter else {
        return false;
    };
    if filter.is_empty() {
        return true;
    }
    let Value::Object(doc) = doc else {
        return false;
    };
    filter.iter().all(|(key, expected)| doc.get(key) == Some(expected))
}

/// Apply a `$set`-style update; a bare document replaces fields directly.
fn apply_update(doc: &mut Value, update: &Value) {
    let fields = update
        .get("$set")
        .and_then(Value::as_object)
        .or_else(|| update.as_object());
    let Some(fields) = fields else {
        return;
    };
    if let Value::Object(doc) = doc {
        for (key, value) in fields {
            if key.starts_with('$') {
                continue;
            }
            doc.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl DocumentConnection for MemoryConnection {
    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Value,
        limit: Option<u64>,
    ) -> Result<Vec<Value>, ConnectorError> {
        self.shared.simulate_latency().await;
        let collections = self.shared.collections.lock();
        let docs = collections
            .get(&(database.to_string(), collection.to_string()))
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches_filter(doc, &filter))
                    .take(limit.map_or(usize::MAX, |n| n as usize))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(docs)
    }

    async fn insert(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Value>,
    ) -> Result<u64, ConnectorError> {
        self.shared.simulate_latency().await;
        let count = documents.len() as u64;
        self.shared
            .collections
            .lock()
            .entry((database.to_string(), collection.to_string()))
            .or_default()
            .extend(documents);
        Ok(count)
    }

    async fn update(
        &self,
        database: &str,
        collection: &str,
        filter: Value,
        update: Value,
        multi: bool,
    ) -> Result<u64, ConnectorError> {
        self.shared.simulate_latency().await;
        let mut collections = self.shared.collections.lock();
        let Some(docs) = collections.get_mut(&(database.to_string(), collection.to_string()))
        else {
            return Ok(0);
        };

        let mut modified = 0;
        for doc in docs.iter_mut() {
            if matches_filter(doc, &filter) {
                apply_update(doc, &update);
                modified += 1;
                if !multi {
                    break;
                }
            }
        }
        Ok(modified)
    }

    async fn delete(
        &self,
        database: &str,
        collection: &str,
        filter: Value,
        multi: bool,
    ) -> Result<u64, ConnectorError> {
        self.shared.simulate_latency().await;
        let mut collections = self.shared.collections.lock();
        let Some(docs) = collections.get_mut(&(database.to_string(), collection.to_string()))
        else {
            return Ok(0);
        };

        let before = docs.len();
        if multi {
            docs.retain(|doc| !matches_filter(doc, &filter));
        } else if let Some(pos) = docs
            .iter()
            .position(|doc| matches_filter(doc, &filter))
        {
            docs.remove(pos);
        }
        Ok((before - docs.len()) as u64)
    }

    async fn count(
        &self,
        database: &str,
        collection: &str,
        filter: Value,
    ) -> Result<u64, ConnectorError> {
        let docs = self.find(database, collection, filter, None).await?;
        Ok(docs.len() as u64)
    }

    async fn ping(&self) -> bool {
        !self.shared.broken.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quasar_core::{ConnectionDescriptor, InstanceId, InstanceKind};
    use serde_json::json;

    fn sql_instance() -> Instance {
        Instance::new(
            InstanceId::random(),
            "pg",
            InstanceKind::Postgres,
            ConnectionDescriptor::new("postgresql://localhost/test"),
        )
    }

    fn mongo_instance() -> Instance {
        Instance::new(
            InstanceId::random(),
            "mongo",
            InstanceKind::Mongodb,
            ConnectionDescriptor::new("mongodb://localhost:27017")
                .with_default_database("app"),
        )
    }

    async fn sql_conn(factory: &MemoryFactory) -> Arc<dyn SqlConnection> {
        match factory.connect(&sql_instance()).await.unwrap() {
            ScopedConnection::Sql(conn) => conn,
            ScopedConnection::Document(_) => unreachable!(),
        }
    }

    async fn doc_conn(factory: &MemoryFactory) -> Arc<dyn DocumentConnection> {
        match factory.connect(&mongo_instance()).await.unwrap() {
            ScopedConnection::Document(conn) => conn,
            ScopedConnection::Sql(_) => unreachable!(),
        }
    }

    #[tokio::test]
    async fn seeded_sql_replays_and_records() {
        let factory = MemoryFactory::new()
            .with_sql_rows("SELECT 1", vec![json!({"?column?": 1})]);
        let conn = sql_conn(&factory).await;

        let outcome = conn.query("SELECT 1", &[]).await.unwrap();
        assert_eq!(outcome.rows, vec![json!({"?column?": 1})]);

        let outcome = conn.query("SELECT nothing", &[]).await.unwrap();
        assert_eq!(outcome, SqlOutcome::default());

        assert_eq!(factory.executed(), vec!["SELECT 1", "SELECT nothing"]);
    }

    #[tokio::test]
    async fn transactions_track_state() {
        let factory = MemoryFactory::new();
        let conn = sql_conn(&factory).await;

        assert!(!conn.in_transaction());
        conn.begin().await.unwrap();
        assert!(conn.in_transaction());
        assert!(conn.begin().await.is_err(), "nested begin must fail");
        conn.rollback().await.unwrap();
        assert!(!conn.in_transaction());
        assert!(conn.commit().await.is_err(), "commit without begin");
    }

    #[tokio::test]
    async fn find_filters_and_preserves_order() {
        let factory = MemoryFactory::new().with_collection(
            "app",
            "orders",
            vec![
                json!({"id": 1, "status": "pending"}),
                json!({"id": 2, "status": "shipped"}),
                json!({"id": 3, "status": "pending"}),
            ],
        );
        let conn = doc_conn(&factory).await;

        let docs = conn
            .find("app", "orders", json!({"status": "pending"}), None)
            .await
            .unwrap();
        assert_eq!(docs, vec![
            json!({"id": 1, "status": "pending"}),
            json!({"id": 3, "status": "pending"}),
        ]);

        let all = conn.find("app", "orders", json!({}), None).await.unwrap();
        assert_eq!(all.len(), 3);

        let limited = conn
            .find("app", "orders", json!({}), Some(2))
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn update_and_delete_respect_multi() {
        let factory = MemoryFactory::new().with_collection(
            "app",
            "orders",
            vec![
                json!({"id": 1, "status": "pending"}),
                json!({"id": 2, "status": "pending"}),
            ],
        );
        let conn = doc_conn(&factory).await;

        let modified = conn
            .update(
                "app",
                "orders",
                json!({"status": "pending"}),
                json!({"$set": {"status": "done"}}),
                false,
            )
            .await
            .unwrap();
        assert_eq!(modified, 1);

        let deleted = conn
            .delete("app", "orders", json!({"status": "pending"}), true)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(factory.documents("app", "orders").len(), 1);
    }

    #[tokio::test]
    async fn connect_failures_then_recovery() {
        let factory = MemoryFactory::new().with_connect_failures(2);

        let err = factory.connect(&sql_instance()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(factory.connect(&sql_instance()).await.is_err());
        assert!(factory.connect(&sql_instance()).await.is_ok());
    }

    #[tokio::test]
    async fn open_connection_accounting() {
        let factory = MemoryFactory::new();
        let a = factory.connect(&sql_instance()).await.unwrap();
        let b = factory.connect(&sql_instance()).await.unwrap();
        assert_eq!(factory.open_connections(), 2);
        assert_eq!(factory.max_open_connections(), 2);

        drop(a);
        drop(b);
        assert_eq!(factory.open_connections(), 0);
        assert_eq!(factory.max_open_connections(), 2);
    }

    #[tokio::test]
    async fn broken_connections_fail_ping() {
        let factory = MemoryFactory::new();
        let conn = factory.connect(&sql_instance()).await.unwrap();
        assert!(conn.ping().await);
        factory.set_broken(true);
        assert!(!conn.ping().await);
        factory.set_broken(false);
        assert!(conn.ping().await);
    }
}
