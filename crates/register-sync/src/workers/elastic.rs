//! Search index: one index per key, one document per record.

use async_trait::async_trait;
use register_shared::types::{AfterhandlerType, KeyId, RecordOperation};
use register_store::Record;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::http::HttpTarget;
use super::queue::{Delivery, WorkerQueue};
use crate::error::WorkerError;
use crate::worker::{ReindexOptions, Worker};

const KIND: AfterhandlerType = AfterhandlerType::Elastic;

pub const DEFAULT_INDEX_PREFIX: &str = "register";
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElasticConfig {
    pub url: String,
    pub index_prefix: String,
    pub max_document_bytes: usize,
}

impl ElasticConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            index_prefix: DEFAULT_INDEX_PREFIX.to_string(),
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }
}

#[derive(Clone)]
struct Indexer {
    target: HttpTarget,
    index_prefix: String,
}

impl Indexer {
    fn index_name(&self, key_id: KeyId) -> String {
        format!("{}-{}", self.index_prefix, key_id)
    }

    fn doc_path(&self, record: &Record) -> String {
        format!("{}/_doc/{}", self.index_name(record.key_id), record.id)
    }

    async fn put_document(&self, record: &Record) -> Result<(), WorkerError> {
        let request = self
            .target
            .client()
            .put(self.target.url(&self.doc_path(record)))
            .json(&document(record));
        self.target.send(request, false).await
    }

    async fn delete_document(&self, record: &Record) -> Result<(), WorkerError> {
        let request = self
            .target
            .client()
            .delete(self.target.url(&self.doc_path(record)));
        self.target.send(request, true).await
    }
}

/// Search document of a record. Encrypted data is indexed as the opaque
/// ciphertext string and carries no search string.
pub fn document(record: &Record) -> Value {
    let data = if record.is_encrypted {
        Value::String(record.data.clone())
    } else {
        serde_json::from_str(&record.data).unwrap_or_else(|_| Value::String(record.data.clone()))
    };
    json!({
        "recordId": record.id,
        "keyId": record.key_id,
        "registerId": record.register_id,
        "isEncrypted": record.is_encrypted,
        "data": data,
        "searchString": record.search_string,
        "createdAt": record.created_at,
        "updatedAt": record.updated_at,
    })
}

pub struct ElasticWorker {
    indexer: Indexer,
    max_document_bytes: usize,
    queue: WorkerQueue,
}

impl ElasticWorker {
    pub fn new(client: reqwest::Client, config: &ElasticConfig) -> Self {
        Self {
            indexer: Indexer {
                target: HttpTarget::new(KIND, client, &config.url),
                index_prefix: config.index_prefix.clone(),
            },
            max_document_bytes: config.max_document_bytes,
            queue: WorkerQueue::new(KIND),
        }
    }

    pub fn index_name(&self, key_id: KeyId) -> String {
        self.indexer.index_name(key_id)
    }
}

#[async_trait]
impl Worker for ElasticWorker {
    fn afterhandler_type(&self) -> AfterhandlerType {
        KIND
    }

    async fn start(&self) -> Result<(), WorkerError> {
        let indexer = self.indexer.clone();
        self.queue
            .start(move |record, operation| {
                let indexer = indexer.clone();
                async move {
                    match operation {
                        RecordOperation::Delete => indexer.delete_document(&record).await,
                        _ => indexer.put_document(&record).await,
                    }
                }
            })
            .await
    }

    async fn validate_record(
        &self,
        record: &Record,
        operation: RecordOperation,
    ) -> Result<(), WorkerError> {
        if operation == RecordOperation::Delete {
            return Ok(());
        }
        let size = serde_json::to_vec(&document(record))
            .map(|bytes| bytes.len())
            .unwrap_or(usize::MAX);
        if size > self.max_document_bytes {
            return Err(WorkerError::Rejected {
                worker: KIND,
                reason: format!(
                    "document is {size} bytes, limit is {}",
                    self.max_document_bytes
                ),
            });
        }
        Ok(())
    }

    fn handle_record(&self, record: &Record, operation: RecordOperation) -> Delivery {
        self.queue.enqueue(record, operation)
    }

    async fn reindex_reset(
        &self,
        key_id: KeyId,
        _options: &ReindexOptions,
    ) -> Result<(), WorkerError> {
        let target = &self.indexer.target;
        let index = self.indexer.index_name(key_id);

        target
            .send(target.client().delete(target.url(&index)), true)
            .await?;
        target
            .send(
                target
                    .client()
                    .put(target.url(&index))
                    .json(&json!({ "settings": { "number_of_shards": 1 } })),
                false,
            )
            .await?;

        info!(%index, "Search index recreated");
        Ok(())
    }

    async fn reindex_add(&self, record: &Record) -> Result<(), WorkerError> {
        self.indexer.put_document(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{Method, StatusCode, Uri};
    use axum::Router;
    use chrono::Utc;
    use uuid::Uuid;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Fake search cluster: records every request, answers 404 to index
    /// drops so the tolerated-404 path is exercised.
    async fn fake_cluster() -> (String, Log) {
        async fn handler(State(log): State<Log>, method: Method, uri: Uri) -> StatusCode {
            log.lock().unwrap().push(format!("{method} {}", uri.path()));
            if method == Method::DELETE && !uri.path().contains("_doc") {
                StatusCode::NOT_FOUND
            } else {
                StatusCode::OK
            }
        }

        let log: Log = Arc::default();
        let app = Router::new().fallback(handler).with_state(log.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), log)
    }

    fn record(key_id: KeyId, data: &str) -> Record {
        let now = Utc::now();
        Record {
            id: Uuid::new_v4(),
            key_id,
            register_id: 1,
            data: data.into(),
            is_encrypted: false,
            search_string: Some("alice".into()),
            signature: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn encrypted_data_is_indexed_opaque() {
        let mut r = record(1, "aXY=:dGFn:Y3Q=");
        r.is_encrypted = true;
        r.search_string = None;
        let doc = document(&r);
        assert_eq!(doc["data"], json!("aXY=:dGFn:Y3Q="));
        assert_eq!(doc["searchString"], Value::Null);

        let plain = document(&record(1, r#"{"name":"alice"}"#));
        assert_eq!(plain["data"]["name"], json!("alice"));
    }

    #[tokio::test]
    async fn vetoes_oversized_documents() {
        let mut config = ElasticConfig::new("http://search.invalid");
        config.max_document_bytes = 256;
        let worker = ElasticWorker::new(reqwest::Client::new(), &config);

        let small = record(1, r#"{"a":1}"#);
        assert!(worker.validate_record(&small, RecordOperation::Create).await.is_ok());

        let big = record(1, &format!(r#"{{"blob":"{}"}}"#, "x".repeat(512)));
        let err = worker
            .validate_record(&big, RecordOperation::Update)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("limit is 256"));
        assert!(worker.validate_record(&big, RecordOperation::Delete).await.is_ok());
    }

    #[tokio::test]
    async fn reset_and_fan_out_hit_the_index() {
        let (url, log) = fake_cluster().await;
        let worker = ElasticWorker::new(reqwest::Client::new(), &ElasticConfig::new(url));
        worker.start().await.unwrap();

        worker
            .reindex_reset(7, &ReindexOptions::default())
            .await
            .unwrap();
        let r = record(7, "{}");
        worker.reindex_add(&r).await.unwrap();
        worker
            .handle_record(&r, RecordOperation::Delete)
            .outcome()
            .await
            .unwrap();

        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "DELETE /register-7".to_string(),
                "PUT /register-7".to_string(),
                format!("PUT /register-7/_doc/{}", r.id),
                format!("DELETE /register-7/_doc/{}", r.id),
            ]
        );
    }

    #[tokio::test]
    async fn server_errors_surface_with_status() {
        async fn fail() -> (StatusCode, &'static str) {
            (StatusCode::SERVICE_UNAVAILABLE, "cluster red")
        }
        let app = Router::new().fallback(fail);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let worker = ElasticWorker::new(
            reqwest::Client::new(),
            &ElasticConfig::new(format!("http://{addr}")),
        );
        let err = worker.reindex_add(&record(1, "{}")).await.unwrap_err();
        match err {
            WorkerError::Status { status, body, .. } => {
                assert_eq!(status, 503);
                assert_eq!(body, "cluster red");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
