//! Host objects: the callables a script sees.
//!
//! Every handle here wraps this execution's own connection. Argument and
//! result values cross the boundary as JSON; driver errors surface as
//! script runtime errors with the driver's message.
//!
//! The two Postgres surfaces intentionally disagree on shape: `query(...)`
//! returns the rows directly, `client.query(...)` returns an object with
//! `.rows` and `.rowCount`. Script authors rely on both; see the tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use quasar_core::name::validate_collection_name;
use quasar_script::{HostObject, ScriptError, ScriptResult, ScriptValue};

use crate::connection::{DocumentConnection, SqlConnection};
use crate::error::ConnectorError;

fn db_error(err: ConnectorError) -> ScriptError {
    ScriptError::runtime(err.to_string())
}

fn sql_args(args: &[ScriptValue]) -> ScriptResult<(String, Vec<Value>)> {
    let sql = args
        .first()
        .and_then(ScriptValue::as_str)
        .ok_or_else(|| ScriptError::runtime("query(sql, params): sql must be a string"))?
        .to_string();

    let params = match args.get(1) {
        None | Some(ScriptValue::Null) => Vec::new(),
        Some(ScriptValue::Array(items)) => items.iter().map(ScriptValue::to_json).collect(),
        Some(other) => {
            return Err(ScriptError::runtime(format!(
                "query(sql, params): params must be an array, found {}",
                other.type_name()
            )));
        }
    };

    Ok((sql, params))
}

fn filter_arg(args: &[ScriptValue], method: &str) -> ScriptResult<Value> {
    match args.first() {
        None | Some(ScriptValue::Null) => Ok(Value::Object(serde_json::Map::new())),
        Some(obj @ ScriptValue::Object(_)) => Ok(obj.to_json()),
        Some(other) => Err(ScriptError::runtime(format!(
            "{method}(filter): filter must be an object, found {}",
            other.type_name()
        ))),
    }
}

fn document_arg(args: &[ScriptValue], index: usize, method: &str) -> ScriptResult<Value> {
    match args.get(index) {
        Some(obj @ ScriptValue::Object(_)) => Ok(obj.to_json()),
        Some(other) => Err(ScriptError::runtime(format!(
            "{method}: argument {index} must be an object, found {}",
            other.type_name()
        ))),
        None => Err(ScriptError::runtime(format!(
            "{method}: missing argument {index}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Postgres surface
// ---------------------------------------------------------------------------

/// The bare `query(sql, params)` binding. Returns rows directly.
pub struct QueryFn {
    conn: Arc<dyn SqlConnection>,
}

impl QueryFn {
    /// Wrap a connection.
    #[must_use]
    pub fn new(conn: Arc<dyn SqlConnection>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl HostObject for QueryFn {
    fn kind(&self) -> &'static str {
        "query"
    }

    async fn invoke(&self, args: Vec<ScriptValue>) -> ScriptResult<ScriptValue> {
        let (sql, params) = sql_args(&args)?;
        let outcome = self.conn.query(&sql, &params).await.map_err(db_error)?;
        Ok(ScriptValue::Array(
            outcome
                .rows
                .into_iter()
                .map(ScriptValue::from_json)
                .collect(),
        ))
    }
}

/// The `client` binding: `client.query(...)` returns `{rows, rowCount}`,
/// plus explicit transaction control.
pub struct ClientHandle {
    conn: Arc<dyn SqlConnection>,
}

impl ClientHandle {
    /// Wrap a connection.
    #[must_use]
    pub fn new(conn: Arc<dyn SqlConnection>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl HostObject for ClientHandle {
    fn kind(&self) -> &'static str {
        "client"
    }

    async fn call_method(&self, method: &str, args: Vec<ScriptValue>) -> ScriptResult<ScriptValue> {
        match method {
            "query" => {
                let (sql, params) = sql_args(&args)?;
                let outcome = self.conn.query(&sql, &params).await.map_err(db_error)?;
                let rows = ScriptValue::Array(
                    outcome
                        .rows
                        .into_iter()
                        .map(ScriptValue::from_json)
                        .collect(),
                );
                let mut result = indexmap::IndexMap::new();
                result.insert("rows".to_string(), rows);
                result.insert(
                    "rowCount".to_string(),
                    ScriptValue::Int(outcome.rows_affected as i64),
                );
                Ok(ScriptValue::Object(result))
            }
            "begin" => {
                self.conn.begin().await.map_err(db_error)?;
                Ok(ScriptValue::Null)
            }
            "commit" => {
                self.conn.commit().await.map_err(db_error)?;
                Ok(ScriptValue::Null)
            }
            "rollback" => {
                self.conn.rollback().await.map_err(db_error)?;
                Ok(ScriptValue::Null)
            }
            other => Err(ScriptError::runtime(format!(
                "client.{other} is not a function"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// MongoDB surface
// ---------------------------------------------------------------------------

/// The `db` binding: a handle on the scoped database.
pub struct DbHandle {
    conn: Arc<dyn DocumentConnection>,
    database: String,
}

impl DbHandle {
    /// Wrap a connection scoped to `database`.
    #[must_use]
    pub fn new(conn: Arc<dyn DocumentConnection>, database: String) -> Self {
        Self { conn, database }
    }
}

#[async_trait]
impl HostObject for DbHandle {
    fn kind(&self) -> &'static str {
        "db"
    }

    fn get_property(&self, name: &str) -> Option<ScriptValue> {
        (name == "name").then(|| ScriptValue::Str(self.database.clone()))
    }

    async fn call_method(&self, method: &str, args: Vec<ScriptValue>) -> ScriptResult<ScriptValue> {
        match method {
            "collection" => collection_handle(&self.conn, &self.database, &args),
            other => Err(ScriptError::runtime(format!("db.{other} is not a function"))),
        }
    }
}

/// The `collection(name)` binding.
pub struct CollectionFn {
    conn: Arc<dyn DocumentConnection>,
    database: String,
}

impl CollectionFn {
    /// Wrap a connection scoped to `database`.
    #[must_use]
    pub fn new(conn: Arc<dyn DocumentConnection>, database: String) -> Self {
        Self { conn, database }
    }
}

#[async_trait]
impl HostObject for CollectionFn {
    fn kind(&self) -> &'static str {
        "collection"
    }

    async fn invoke(&self, args: Vec<ScriptValue>) -> ScriptResult<ScriptValue> {
        collection_handle(&self.conn, &self.database, &args)
    }
}

fn collection_handle(
    conn: &Arc<dyn DocumentConnection>,
    database: &str,
    args: &[ScriptValue],
) -> ScriptResult<ScriptValue> {
    let name = args
        .first()
        .and_then(ScriptValue::as_str)
        .ok_or_else(|| ScriptError::runtime("collection(name): name must be a string"))?;
    validate_collection_name(name).map_err(|err| ScriptError::runtime(err.message))?;

    Ok(ScriptValue::Handle(Arc::new(CollectionHandle {
        conn: Arc::clone(conn),
        database: database.to_string(),
        name: name.to_string(),
    })))
}

/// A handle bound to one collection.
pub struct CollectionHandle {
    conn: Arc<dyn DocumentConnection>,
    database: String,
    name: String,
}

#[async_trait]
impl HostObject for CollectionHandle {
    fn kind(&self) -> &'static str {
        "collection handle"
    }

    fn get_property(&self, name: &str) -> Option<ScriptValue> {
        match name {
            "collectionName" => Some(ScriptValue::Str(self.name.clone())),
            "dbName" => Some(ScriptValue::Str(self.database.clone())),
            _ => None,
        }
    }

    async fn call_method(&self, method: &str, args: Vec<ScriptValue>) -> ScriptResult<ScriptValue> {
        match method {
            "find" => {
                let filter = filter_arg(&args, "find")?;
                Ok(ScriptValue::Handle(Arc::new(CursorHandle::pending(
                    Arc::clone(&self.conn),
                    self.database.clone(),
                    self.name.clone(),
                    filter,
                ))))
            }

            "findOne" => {
                let filter = filter_arg(&args, "findOne")?;
                let docs = self
                    .conn
                    .find(&self.database, &self.name, filter, Some(1))
                    .await
                    .map_err(db_error)?;
                Ok(docs
                    .into_iter()
                    .next()
                    .map_or(ScriptValue::Null, ScriptValue::from_json))
            }

            "insertOne" => {
                let doc = document_arg(&args, 0, "insertOne")?;
                let inserted = self
                    .conn
                    .insert(&self.database, &self.name, vec![doc])
                    .await
                    .map_err(db_error)?;
                Ok(write_result("insertedCount", inserted))
            }

            "insertMany" => {
                let Some(ScriptValue::Array(items)) = args.first() else {
                    return Err(ScriptError::runtime(
                        "insertMany(docs): docs must be an array",
                    ));
                };
                let docs = items
                    .iter()
                    .map(|item| match item {
                        obj @ ScriptValue::Object(_) => Ok(obj.to_json()),
                        other => Err(ScriptError::runtime(format!(
                            "insertMany(docs): every document must be an object, found {}",
                            other.type_name()
                        ))),
                    })
                    .collect::<ScriptResult<Vec<_>>>()?;
                let inserted = self
                    .conn
                    .insert(&self.database, &self.name, docs)
                    .await
                    .map_err(db_error)?;
                Ok(write_result("insertedCount", inserted))
            }

            "updateOne" | "updateMany" => {
                let filter = filter_arg(&args, method)?;
                let update = document_arg(&args, 1, method)?;
                let modified = self
                    .conn
                    .update(
                        &self.database,
                        &self.name,
                        filter,
                        update,
                        method == "updateMany",
                    )
                    .await
                    .map_err(db_error)?;
                Ok(write_result("modifiedCount", modified))
            }

            "deleteOne" | "deleteMany" => {
                let filter = filter_arg(&args, method)?;
                let deleted = self
                    .conn
                    .delete(
                        &self.database,
                        &self.name,
                        filter,
                        method == "deleteMany",
                    )
                    .await
                    .map_err(db_error)?;
                Ok(write_result("deletedCount", deleted))
            }

            "countDocuments" => {
                let filter = filter_arg(&args, "countDocuments")?;
                let count = self
                    .conn
                    .count(&self.database, &self.name, filter)
                    .await
                    .map_err(db_error)?;
                Ok(ScriptValue::Int(count as i64))
            }

            other => Err(ScriptError::runtime(format!(
                "collection.{other} is not a function"
            ))),
        }
    }
}

fn write_result(count_field: &str, count: u64) -> ScriptValue {
    let mut result = indexmap::IndexMap::new();
    result.insert("acknowledged".to_string(), ScriptValue::Bool(true));
    result.insert(count_field.to_string(), ScriptValue::Int(count as i64));
    ScriptValue::Object(result)
}

// ---------------------------------------------------------------------------
// Cursors
// ---------------------------------------------------------------------------

enum CursorState {
    Pending {
        conn: Arc<dyn DocumentConnection>,
        database: String,
        collection: String,
        filter: Value,
        limit: Option<u64>,
    },
    Consumed,
}

/// A lazy find cursor: the query runs when the cursor is drained, and a
/// cursor is finite: draining it twice is an error.
pub struct CursorHandle {
    state: Arc<Mutex<CursorState>>,
}

impl CursorHandle {
    fn pending(
        conn: Arc<dyn DocumentConnection>,
        database: String,
        collection: String,
        filter: Value,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(CursorState::Pending {
                conn,
                database,
                collection,
                filter,
                limit: None,
            })),
        }
    }
}

#[async_trait]
impl HostObject for CursorHandle {
    fn kind(&self) -> &'static str {
        "cursor"
    }

    async fn call_method(&self, method: &str, args: Vec<ScriptValue>) -> ScriptResult<ScriptValue> {
        match method {
            "limit" => {
                let n = args
                    .first()
                    .and_then(ScriptValue::as_int)
                    .filter(|n| *n >= 0)
                    .ok_or_else(|| {
                        ScriptError::runtime("limit(n): n must be a non-negative integer")
                    })?;
                {
                    let mut state = self.state.lock();
                    match &mut *state {
                        CursorState::Pending { limit, .. } => *limit = Some(n as u64),
                        CursorState::Consumed => {
                            return Err(ScriptError::runtime("cursor already consumed"));
                        }
                    }
                }
                // cursor methods chain: find(...).limit(5).toArray()
                Ok(ScriptValue::Handle(Arc::new(Self {
                    state: Arc::clone(&self.state),
                })))
            }

            "toArray" => {
                let taken = {
                    let mut state = self.state.lock();
                    std::mem::replace(&mut *state, CursorState::Consumed)
                };
                match taken {
                    CursorState::Pending {
                        conn,
                        database,
                        collection,
                        filter,
                        limit,
                    } => {
                        let docs = conn
                            .find(&database, &collection, filter, limit)
                            .await
                            .map_err(db_error)?;
                        Ok(ScriptValue::Array(
                            docs.into_iter().map(ScriptValue::from_json).collect(),
                        ))
                    }
                    CursorState::Consumed => {
                        Err(ScriptError::runtime("cursor already consumed"))
                    }
                }
            }

            other => Err(ScriptError::runtime(format!(
                "cursor.{other} is not a function"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionFactory, ScopedConnection};
    use crate::memory::MemoryFactory;
    use pretty_assertions::assert_eq;
    use quasar_core::{ConnectionDescriptor, Instance, InstanceId, InstanceKind};
    use serde_json::json;

    async fn sql_handles(factory: &MemoryFactory) -> (QueryFn, ClientHandle) {
        let instance = Instance::new(
            InstanceId::random(),
            "pg",
            InstanceKind::Postgres,
            ConnectionDescriptor::new("postgresql://localhost/test"),
        );
        match factory.connect(&instance).await.unwrap() {
            ScopedConnection::Sql(conn) => {
                (QueryFn::new(Arc::clone(&conn)), ClientHandle::new(conn))
            }
            ScopedConnection::Document(_) => unreachable!(),
        }
    }

    async fn collection(factory: &MemoryFactory, name: &str) -> ScriptValue {
        let instance = Instance::new(
            InstanceId::random(),
            "mongo",
            InstanceKind::Mongodb,
            ConnectionDescriptor::new("mongodb://localhost:27017"),
        );
        let ScopedConnection::Document(conn) = factory.connect(&instance).await.unwrap() else {
            unreachable!()
        };
        collection_handle(&conn, "app", &[ScriptValue::Str(name.to_string())]).unwrap()
    }

    #[tokio::test]
    async fn query_and_client_query_disagree_on_shape() {
        // the dual surface is contractual: query() → rows, client.query() → {rows, rowCount}
        let factory = MemoryFactory::new()
            .with_sql_rows("SELECT id FROM t", vec![json!({"id": 1}), json!({"id": 2})]);
        let (query, client) = sql_handles(&factory).await;

        let bare = query
            .invoke(vec![ScriptValue::Str("SELECT id FROM t".into())])
            .await
            .unwrap();
        assert_eq!(bare.to_json(), json!([{"id": 1}, {"id": 2}]));

        let wrapped = client
            .call_method("query", vec![ScriptValue::Str("SELECT id FROM t".into())])
            .await
            .unwrap();
        assert_eq!(
            wrapped.to_json(),
            json!({"rows": [{"id": 1}, {"id": 2}], "rowCount": 2})
        );
    }

    #[tokio::test]
    async fn query_requires_sql_string() {
        let factory = MemoryFactory::new();
        let (query, _) = sql_handles(&factory).await;
        let err = query.invoke(vec![ScriptValue::Int(5)]).await.unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(_)));
    }

    #[tokio::test]
    async fn cursor_is_not_restartable() {
        let factory = MemoryFactory::new().with_collection(
            "app",
            "orders",
            vec![json!({"id": 1}), json!({"id": 2})],
        );
        let handle = collection(&factory, "orders").await;
        let ScriptValue::Handle(coll) = handle else {
            unreachable!()
        };

        let cursor = coll.call_method("find", vec![]).await.unwrap();
        let ScriptValue::Handle(cursor) = cursor else {
            unreachable!()
        };

        let docs = cursor.call_method("toArray", vec![]).await.unwrap();
        assert_eq!(docs.to_json(), json!([{"id": 1}, {"id": 2}]));

        let err = cursor.call_method("toArray", vec![]).await.unwrap_err();
        assert_eq!(err, ScriptError::runtime("cursor already consumed"));
    }

    #[tokio::test]
    async fn cursor_limit_applies_before_drain() {
        let factory = MemoryFactory::new().with_collection(
            "app",
            "orders",
            vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})],
        );
        let ScriptValue::Handle(coll) = collection(&factory, "orders").await else {
            unreachable!()
        };
        let ScriptValue::Handle(cursor) = coll.call_method("find", vec![]).await.unwrap() else {
            unreachable!()
        };
        let ScriptValue::Handle(cursor) = cursor
            .call_method("limit", vec![ScriptValue::Int(2)])
            .await
            .unwrap()
        else {
            unreachable!()
        };
        let docs = cursor.call_method("toArray", vec![]).await.unwrap();
        assert_eq!(docs.to_json(), json!([{"id": 1}, {"id": 2}]));
    }

    #[tokio::test]
    async fn reserved_collection_names_are_rejected() {
        let factory = MemoryFactory::new();
        let instance = Instance::new(
            InstanceId::random(),
            "mongo",
            InstanceKind::Mongodb,
            ConnectionDescriptor::new("mongodb://localhost:27017"),
        );
        let ScopedConnection::Document(conn) = factory.connect(&instance).await.unwrap() else {
            unreachable!()
        };
        let err = collection_handle(&conn, "app", &[ScriptValue::Str("system.users".into())])
            .unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(_)));
    }
}
