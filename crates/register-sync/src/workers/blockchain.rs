//! Ledger anchoring.
//!
//! Every record version is anchored by its BLAKE3 digest. The ledger is
//! append-only, so deletes are vetoed before they are committed.

use async_trait::async_trait;
use register_shared::types::{AfterhandlerType, KeyId, RecordOperation};
use register_store::Record;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::http::HttpTarget;
use super::queue::{Delivery, WorkerQueue};
use crate::error::WorkerError;
use crate::worker::{ReindexOptions, Worker};

const KIND: AfterhandlerType = AfterhandlerType::Blockchain;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainConfig {
    pub url: String,
}

pub struct BlockchainWorker {
    target: HttpTarget,
    queue: WorkerQueue,
}

impl BlockchainWorker {
    pub fn new(client: reqwest::Client, config: &BlockchainConfig) -> Self {
        Self {
            target: HttpTarget::new(KIND, client, &config.url),
            queue: WorkerQueue::new(KIND),
        }
    }

    async fn anchor(target: &HttpTarget, record: &Record) -> Result<(), WorkerError> {
        let hash = record_digest(record);
        debug!(record = %record.id, %hash, "Anchoring record");
        let request = target
            .client()
            .put(target.url(&format!("anchors/{}", record.id)))
            .json(&json!({
                "keyId": record.key_id,
                "registerId": record.register_id,
                "hash": hash,
                "updatedAt": record.updated_at,
            }));
        target.send(request, false).await
    }
}

/// Hex BLAKE3 digest of the stored record data.
pub fn record_digest(record: &Record) -> String {
    blake3::hash(record.data.as_bytes()).to_hex().to_string()
}

#[async_trait]
impl Worker for BlockchainWorker {
    fn afterhandler_type(&self) -> AfterhandlerType {
        KIND
    }

    async fn start(&self) -> Result<(), WorkerError> {
        let target = self.target.clone();
        self.queue
            .start(move |record, operation| {
                let target = target.clone();
                async move {
                    match operation {
                        RecordOperation::Delete => Ok(()),
                        _ => Self::anchor(&target, &record).await,
                    }
                }
            })
            .await
    }

    async fn validate_record(
        &self,
        _record: &Record,
        operation: RecordOperation,
    ) -> Result<(), WorkerError> {
        if operation == RecordOperation::Delete {
            return Err(WorkerError::Rejected {
                worker: KIND,
                reason: "anchored records cannot be deleted".into(),
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
        let request = self
            .target
            .client()
            .post(self.target.url(&format!("keys/{key_id}/sessions")))
            .json(&json!({ "keyId": key_id }));
        self.target.send(request, false).await
    }

    async fn reindex_add(&self, record: &Record) -> Result<(), WorkerError> {
        Self::anchor(&self.target, record).await
    }
}
