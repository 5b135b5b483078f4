//! sqlx-backed Postgres connector (`postgres` feature).
//!
//! Each scoped connection is one dedicated `PgConnection`, not a driver
//! pool: the sandbox's own pool bounds concurrency, and a dedicated
//! connection is what makes the script's `client.begin()` meaningful.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::TryStreamExt;
use secrecy::ExposeSecret;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Either, Executor, Postgres, Row, TypeInfo};
use tokio::sync::Mutex;

use quasar_core::Instance;

use crate::connection::{ScopedConnection, SqlConnection, SqlOutcome};
use crate::error::ConnectorError;

/// Open a dedicated connection for `instance`.
pub(crate) async fn connect(instance: &Instance) -> Result<ScopedConnection, ConnectorError> {
    let url = instance.connection.url.expose_secret();
    let conn = PgConnection::connect(url)
        .await
        .map_err(|err| ConnectorError::connect(err.to_string(), true))?;

    Ok(ScopedConnection::Sql(Arc::new(PgScopedConnection {
        conn: Mutex::new(conn),
        in_transaction: AtomicBool::new(false),
    })))
}

struct PgScopedConnection {
    conn: Mutex<PgConnection>,
    in_transaction: AtomicBool,
}

impl PgScopedConnection {
    async fn execute_control(&self, statement: &str) -> Result<(), ConnectorError> {
        let mut conn = self.conn.lock().await;
        conn.execute(statement)
            .await
            .map_err(|err| ConnectorError::query(err.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SqlConnection for PgScopedConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<SqlOutcome, ConnectorError> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }

        let mut conn = self.conn.lock().await;
        let mut stream = conn.fetch_many(query);

        let mut outcome = SqlOutcome::default();
        while let Some(item) = stream
            .try_next()
            .await
            .map_err(|err| ConnectorError::query(err.to_string()))?
        {
            match item {
                Either::Left(result) => outcome.rows_affected += result.rows_affected(),
                Either::Right(row) => outcome.rows.push(row_to_json(&row)),
            }
        }
        Ok(outcome)
    }

    async fn begin(&self) -> Result<(), ConnectorError> {
        if self.in_transaction.swap(true, Ordering::SeqCst) {
            return Err(ConnectorError::query("transaction already open"));
        }
        self.execute_control("BEGIN").await
    }

    async fn commit(&self) -> Result<(), ConnectorError> {
        if !self.in_transaction.swap(false, Ordering::SeqCst) {
            return Err(ConnectorError::query("no open transaction"));
        }
        self.execute_control("COMMIT").await
    }

    async fn rollback(&self) -> Result<(), ConnectorError> {
        if !self.in_transaction.swap(false, Ordering::SeqCst) {
            return Err(ConnectorError::query("no open transaction"));
        }
        self.execute_control("ROLLBACK").await
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> bool {
        let mut conn = self.conn.lock().await;
        conn.ping().await.is_ok()
    }
}

fn bind_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => n.as_i64().map_or_else(
            || query.bind(n.as_f64().unwrap_or(f64::NAN)),
            |i| query.bind(i),
        ),
        Value::String(s) => query.bind(s.clone()),
        // arrays and objects travel as jsonb
        other => query.bind(other.clone()),
    }
}

/// Decode a row into a column-name → value map, by declared column type.
fn row_to_json(row: &PgRow) -> Value {
    let mut object = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_info().name());
        object.insert(column.name().to_string(), value);
    }
    Value::Object(object)
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Value {
    match type_name {
        "BOOL" => opt(row.try_get::<Option<bool>, _>(idx)).map_or(Value::Null, Value::Bool),
        "INT2" => int_value(opt(row.try_get::<Option<i16>, _>(idx)).map(i64::from)),
        "INT4" => int_value(opt(row.try_get::<Option<i32>, _>(idx)).map(i64::from)),
        "INT8" => int_value(opt(row.try_get::<Option<i64>, _>(idx))),
        "FLOAT4" => float_value(opt(row.try_get::<Option<f32>, _>(idx)).map(f64::from)),
        "FLOAT8" => float_value(opt(row.try_get::<Option<f64>, _>(idx))),
        "TEXT" | "VARCHAR" | "NAME" | "BPCHAR" | "CHAR" => {
            opt(row.try_get::<Option<String>, _>(idx)).map_or(Value::Null, Value::String)
        }
        "UUID" => opt(row.try_get::<Option<sqlx::types::Uuid>, _>(idx))
            .map_or(Value::Null, |u| Value::String(u.to_string())),
        "JSON" | "JSONB" => opt(row.try_get::<Option<Value>, _>(idx)).unwrap_or(Value::Null),
        "TIMESTAMPTZ" => opt(row.try_get::<Option<
            sqlx::types::chrono::DateTime<sqlx::types::chrono::Utc>,
        >, _>(idx))
        .map_or(Value::Null, |ts| Value::String(ts.to_rfc3339())),
        "TIMESTAMP" => opt(row.try_get::<Option<sqlx::types::chrono::NaiveDateTime>, _>(idx))
            .map_or(Value::Null, |ts| Value::String(ts.to_string())),
        "DATE" => opt(row.try_get::<Option<sqlx::types::chrono::NaiveDate>, _>(idx))
            .map_or(Value::Null, |d| Value::String(d.to_string())),
        other => {
            // last resort: text decode, else null
            match row.try_get::<Option<String>, _>(idx) {
                Ok(v) => v.map_or(Value::Null, Value::String),
                Err(_) => {
                    tracing::debug!(column_type = other, "undecodable column, returning null");
                    Value::Null
                }
            }
        }
    }
}

fn opt<T>(result: Result<Option<T>, sqlx::Error>) -> Option<T> {
    result.ok().flatten()
}

fn int_value(v: Option<i64>) -> Value {
    v.map_or(Value::Null, Value::from)
}

fn float_value(v: Option<f64>) -> Value {
    v.and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
        .unwrap_or(Value::Null)
}
