//! Public links: one shareable link per record.

use async_trait::async_trait;
use register_shared::types::{AfterhandlerType, KeyId, RecordOperation};
use register_store::Record;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::http::HttpTarget;
use super::queue::{Delivery, WorkerQueue};
use crate::error::WorkerError;
use crate::worker::{ReindexOptions, Worker};

const KIND: AfterhandlerType = AfterhandlerType::Plink;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlinkConfig {
    pub url: String,
}

pub struct PlinkWorker {
    target: HttpTarget,
    queue: WorkerQueue,
}

impl PlinkWorker {
    pub fn new(client: reqwest::Client, config: &PlinkConfig) -> Self {
        Self {
            target: HttpTarget::new(KIND, client, &config.url),
            queue: WorkerQueue::new(KIND),
        }
    }

    async fn upsert_link(target: &HttpTarget, record: &Record) -> Result<(), WorkerError> {
        let request = target
            .client()
            .put(target.url(&format!("links/{}", record.id)))
            .json(&json!({
                "keyId": record.key_id,
                "registerId": record.register_id,
            }));
        target.send(request, false).await
    }

    async fn remove_link(target: &HttpTarget, record: &Record) -> Result<(), WorkerError> {
        let request = target
            .client()
            .delete(target.url(&format!("links/{}", record.id)));
        target.send(request, true).await
    }
}

#[async_trait]
impl Worker for PlinkWorker {
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
                        RecordOperation::Delete => Self::remove_link(&target, &record).await,
                        _ => Self::upsert_link(&target, &record).await,
                    }
                }
            })
            .await
    }

    /// Links are published under their register, so a record outside any
    /// register cannot get one. Removing a link is always allowed.
    async fn validate_record(
        &self,
        record: &Record,
        operation: RecordOperation,
    ) -> Result<(), WorkerError> {
        if operation != RecordOperation::Delete && record.register_id <= 0 {
            return Err(WorkerError::Rejected {
                worker: KIND,
                reason: format!(
                    "a public link needs a positive register id, got {}",
                    record.register_id
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
        let request = self
            .target
            .client()
            .delete(self.target.url(&format!("keys/{key_id}/links")));
        self.target.send(request, true).await
    }

    async fn reindex_add(&self, record: &Record) -> Result<(), WorkerError> {
        Self::upsert_link(&self.target, record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn vetoes_records_outside_a_register() {
        let worker = PlinkWorker::new(
            reqwest::Client::new(),
            &PlinkConfig {
                url: "http://links.invalid".into(),
            },
        );
        let now = Utc::now();
        let mut record = Record {
            id: Uuid::new_v4(),
            key_id: 1,
            register_id: 0,
            data: "{}".into(),
            is_encrypted: false,
            search_string: None,
            signature: None,
            created_at: now,
            updated_at: now,
        };

        let err = worker
            .validate_record(&record, RecordOperation::Create)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("positive register id"));
        assert!(worker
            .validate_record(&record, RecordOperation::Delete)
            .await
            .is_ok());

        record.register_id = 4;
        assert!(worker
            .validate_record(&record, RecordOperation::Update)
            .await
            .is_ok());
    }
}
