//! MongoDB connector (`mongodb` feature), over the official driver.
//!
//! The driver's client multiplexes internally; a scoped connection here is
//! a client handle whose pool slot still bounds how many scripts run
//! against the instance at once.

use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::Client;
use mongodb::bson::{Document, doc, to_document};
use mongodb::options::ClientOptions;
use secrecy::ExposeSecret;
use serde_json::Value;

use quasar_core::Instance;

use crate::connection::{DocumentConnection, ScopedConnection};
use crate::error::ConnectorError;

/// Open a client handle for `instance` and verify it answers a ping.
pub(crate) async fn connect(instance: &Instance) -> Result<ScopedConnection, ConnectorError> {
    let mut options = ClientOptions::parse(instance.connection.url.expose_secret())
        .await
        .map_err(|err| ConnectorError::connect(err.to_string(), false))?;

    options.app_name = Some("quasar-sandbox".to_string());
    // mirror the sandbox's own per-instance bound on the driver side
    options.max_pool_size = Some(instance.connection.max_connections as u32);

    let client = Client::with_options(options)
        .map_err(|err| ConnectorError::connect(err.to_string(), false))?;

    // a dead server should fail acquire (and its one retry), not the script
    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await
        .map_err(|err| ConnectorError::connect(err.to_string(), true))?;

    Ok(ScopedConnection::Document(Arc::new(MongoScopedConnection {
        client,
    })))
}

struct MongoScopedConnection {
    client: Client,
}

impl MongoScopedConnection {
    fn collection(&self, database: &str, collection: &str) -> mongodb::Collection<Document> {
        self.client.database(database).collection(collection)
    }
}

fn filter_doc(filter: &Value) -> Result<Document, ConnectorError> {
    to_document(filter).map_err(|err| ConnectorError::query(format!("invalid filter: {err}")))
}

fn update_doc(update: &Value) -> Result<Document, ConnectorError> {
    let doc =
        to_document(update).map_err(|err| ConnectorError::query(format!("invalid update: {err}")))?;
    // the driver requires operator form; bare documents become a $set
    if doc.keys().any(|key| key.starts_with('$')) {
        Ok(doc)
    } else {
        Ok(doc! { "$set": doc })
    }
}

fn doc_to_json(doc: &Document) -> Result<Value, ConnectorError> {
    serde_json::to_value(doc).map_err(|err| ConnectorError::query(err.to_string()))
}

#[async_trait]
impl DocumentConnection for MongoScopedConnection {
    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Value,
        limit: Option<u64>,
    ) -> Result<Vec<Value>, ConnectorError> {
        let mut find = self.collection(database, collection).find(filter_doc(&filter)?);
        if let Some(limit) = limit {
            find = find.limit(limit as i64);
        }
        let cursor = find
            .await
            .map_err(|err| ConnectorError::query(err.to_string()))?;
        let docs: Vec<Document> = cursor
            .try_collect()
            .await
            .map_err(|err| ConnectorError::query(err.to_string()))?;
        docs.iter().map(doc_to_json).collect()
    }

    async fn insert(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Value>,
    ) -> Result<u64, ConnectorError> {
        let docs = documents
            .iter()
            .map(|doc| {
                to_document(doc)
                    .map_err(|err| ConnectorError::query(format!("invalid document: {err}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let result = self
            .collection(database, collection)
            .insert_many(docs)
            .await
            .map_err(|err| ConnectorError::query(err.to_string()))?;
        Ok(result.inserted_ids.len() as u64)
    }

    async fn update(
        &self,
        database: &str,
        collection: &str,
        filter: Value,
        update: Value,
        multi: bool,
    ) -> Result<u64, ConnectorError> {
        let coll = self.collection(database, collection);
        let filter = filter_doc(&filter)?;
        let update = update_doc(&update)?;

        let result = if multi {
            coll.update_many(filter, update).await
        } else {
            coll.update_one(filter, update).await
        }
        .map_err(|err| ConnectorError::query(err.to_string()))?;
        Ok(result.modified_count)
    }

    async fn delete(
        &self,
        database: &str,
        collection: &str,
        filter: Value,
        multi: bool,
    ) -> Result<u64, ConnectorError> {
        let coll = self.collection(database, collection);
        let filter = filter_doc(&filter)?;

        let result = if multi {
            coll.delete_many(filter).await
        } else {
            coll.delete_one(filter).await
        }
        .map_err(|err| ConnectorError::query(err.to_string()))?;
        Ok(result.deleted_count)
    }

    async fn count(
        &self,
        database: &str,
        collection: &str,
        filter: Value,
    ) -> Result<u64, ConnectorError> {
        self.collection(database, collection)
            .count_documents(filter_doc(&filter)?)
            .await
            .map_err(|err| ConnectorError::query(err.to_string()))
    }

    async fn ping(&self) -> bool {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .is_ok()
    }
}
