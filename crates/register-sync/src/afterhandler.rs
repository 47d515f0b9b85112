//! The afterhandler orchestrator.
//!
//! Owns the active workers. Record mutations are validated by every worker
//! before commit and fanned out to every worker after commit. A manual
//! reindex resets the selected workers for a key and re-adds the key's
//! records page by page; the first failure aborts the whole run.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use register_shared::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_REINDEX_SETTLE_SECS, REINDEX_STARTED_NOTE,
};
use register_shared::types::{AfterhandlerType, KeyId, RecordOperation};
use register_store::{Record, SharedDatabase};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{error_chain, SyncError, WorkerError};
use crate::tracker::ReindexTracker;
use crate::worker::{ReindexOptions, Worker};
use crate::workers::queue::Delivery;

#[derive(Debug, Clone)]
pub struct AfterhandlerConfig {
    /// Records read per page during a reindex.
    pub page_size: u32,
    /// Grace period between resetting the workers and re-adding records.
    pub settle_delay: Duration,
}

impl Default for AfterhandlerConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_BATCH_SIZE,
            settle_delay: Duration::from_secs(DEFAULT_REINDEX_SETTLE_SECS),
        }
    }
}

pub struct Afterhandler {
    workers: Vec<Arc<dyn Worker>>,
    db: SharedDatabase,
    tracker: ReindexTracker,
    config: AfterhandlerConfig,
}

impl Afterhandler {
    pub fn new(
        workers: Vec<Arc<dyn Worker>>,
        db: SharedDatabase,
        tracker: ReindexTracker,
        config: AfterhandlerConfig,
    ) -> Self {
        Self {
            workers,
            db,
            tracker,
            config,
        }
    }

    pub fn worker_types(&self) -> Vec<AfterhandlerType> {
        self.workers.iter().map(|w| w.afterhandler_type()).collect()
    }

    /// Start every worker's background loop.
    pub async fn start(&self) -> Result<(), WorkerError> {
        for worker in &self.workers {
            worker.start().await?;
        }
        info!(workers = ?self.worker_types(), "Afterhandler started");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Record fan-out
    // ------------------------------------------------------------------

    /// Ask every worker whether `operation` on `record` may be committed.
    /// The first veto, in worker order, is returned.
    pub async fn validate_record(
        &self,
        record: &Record,
        operation: RecordOperation,
    ) -> Result<(), SyncError> {
        let results = join_all(
            self.workers
                .iter()
                .map(|w| w.validate_record(record, operation)),
        )
        .await;

        match results.into_iter().find_map(Result::err) {
            Some(veto) => {
                info!(record = %record.id, %operation, reason = %veto, "Mutation vetoed");
                Err(SyncError::WorkerValidation(veto))
            }
            None => Ok(()),
        }
    }

    /// Put a committed mutation on every worker's queue. Nothing is awaited,
    /// so mutations dispatched in commit order are delivered in commit order.
    pub fn dispatch(&self, record: &Record, operation: RecordOperation) -> Vec<Delivery> {
        self.workers
            .iter()
            .map(|w| w.handle_record(record, operation))
            .collect()
    }

    /// Deliver a committed mutation to every worker and record the outcome
    /// on its afterhandler row. Worker failures are logged, never returned.
    pub async fn handle_record(
        &self,
        afterhandler_id: i64,
        record: &Record,
        operation: RecordOperation,
    ) -> Result<(), SyncError> {
        let deliveries = self.dispatch(record, operation);
        self.finish(afterhandler_id, record.id, operation, deliveries)
            .await
    }

    /// Enqueue now, wait for the workers off the request path. Callers that
    /// hold the store lock across commit and this call get commit-ordered
    /// delivery.
    pub fn spawn_handle_record(
        self: &Arc<Self>,
        afterhandler_id: i64,
        record: &Record,
        operation: RecordOperation,
    ) -> JoinHandle<()> {
        let deliveries = self.dispatch(record, operation);
        let record_id = record.id;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this
                .finish(afterhandler_id, record_id, operation, deliveries)
                .await
            {
                error!(afterhandler_id, error = %error_chain(&e), "Cannot record fan-out result");
            }
        })
    }

    async fn finish(
        &self,
        afterhandler_id: i64,
        record_id: Uuid,
        operation: RecordOperation,
        deliveries: Vec<Delivery>,
    ) -> Result<(), SyncError> {
        let failures: Vec<String> = join_all(deliveries.into_iter().map(Delivery::outcome))
            .await
            .into_iter()
            .filter_map(Result::err)
            .map(|e| error_chain(&e))
            .collect();

        let db = self.db.lock().await;
        if failures.is_empty() {
            db.mark_afterhandler_synced(afterhandler_id)?;
        } else {
            let message = failures.join("; ");
            warn!(
                afterhandler_id,
                record = %record_id,
                %operation,
                error = %message,
                "Fan-out incomplete"
            );
            db.set_afterhandler_synced_with_error(afterhandler_id, &message)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reindex
    // ------------------------------------------------------------------

    pub async fn is_key_reindexing(&self, key_id: KeyId) -> bool {
        self.tracker.is_reindexing(key_id).await
    }

    /// Start a detached reindex of `key_id`. Fails when one is already
    /// running. The check and the status write are not atomic; two calls
    /// racing within that window may both start.
    pub async fn spawn_reindex(
        self: &Arc<Self>,
        key_id: KeyId,
        options: ReindexOptions,
    ) -> Result<JoinHandle<bool>, SyncError> {
        if self.is_key_reindexing(key_id).await {
            return Err(SyncError::AlreadyReindexing(key_id));
        }
        self.tracker.start(key_id).await;

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            this.run_reindex(key_id, &options).await
        }))
    }

    /// Reset the selected workers for `key_id` and re-add all of its
    /// records. Returns `false` when a worker failed and the run was aborted;
    /// the failure is persisted on the key's afterhandler history.
    pub async fn reindex(&self, key_id: KeyId, options: &ReindexOptions) -> bool {
        self.tracker.start(key_id).await;
        self.run_reindex(key_id, options).await
    }

    async fn run_reindex(&self, key_id: KeyId, options: &ReindexOptions) -> bool {
        let workers: Vec<&Arc<dyn Worker>> = self
            .workers
            .iter()
            .filter(|w| options.includes(w.afterhandler_type()))
            .collect();
        info!(
            key_id,
            workers = ?workers.iter().map(|w| w.afterhandler_type()).collect::<Vec<_>>(),
            "Reindex started"
        );

        match self.reindex_steps(key_id, options, &workers).await {
            Ok((note_id, added)) => {
                let cleared = self
                    .db
                    .lock()
                    .await
                    .clear_afterhandler_note(note_id, REINDEX_STARTED_NOTE);
                if let Err(e) = cleared {
                    warn!(key_id, error = %e, "Cannot clear reindex note");
                }
                self.tracker.stop(key_id).await;
                info!(key_id, added, "Reindex finished");
                true
            }
            Err(err) => {
                let message = error_chain(&err);
                error!(key_id, error = %message, "Reindex aborted");
                let persisted = self
                    .db
                    .lock()
                    .await
                    .set_afterhandler_synced_with_error_by_key_id(key_id, &message);
                if let Err(e) = persisted {
                    error!(key_id, error = %e, "Cannot persist reindex failure");
                }
                self.tracker.stop(key_id).await;
                false
            }
        }
    }

    /// Reset, settle, then the add loop. Returns the id of the row carrying
    /// the progress note and the number of records re-added.
    async fn reindex_steps(
        &self,
        key_id: KeyId,
        options: &ReindexOptions,
        workers: &[&Arc<dyn Worker>],
    ) -> Result<(i64, u64), SyncError> {
        for worker in workers {
            worker
                .reindex_reset(key_id, options)
                .await
                .map_err(|source| SyncError::ReindexWorker {
                    key_id,
                    record_id: None,
                    source,
                })?;
        }

        let note_id = {
            let db = self.db.lock().await;
            if let Some(last) = db.get_last_afterhandler_by_key_id(key_id)? {
                db.clear_afterhandler_error(last.id)?;
            }
            db.note_afterhandler_by_key_id(key_id, REINDEX_STARTED_NOTE)?
        };

        if !self.config.settle_delay.is_zero() {
            tokio::time::sleep(self.config.settle_delay).await;
        }

        let page_size = self.config.page_size.max(1);
        let mut offset = 0u32;
        let mut added = 0u64;
        loop {
            let page = self
                .db
                .lock()
                .await
                .get_records_by_key_id_with_pagination(key_id, offset, page_size)?;
            if page.is_empty() {
                break;
            }

            for record in &page {
                for worker in workers {
                    worker
                        .reindex_add(record)
                        .await
                        .map_err(|source| SyncError::ReindexWorker {
                            key_id,
                            record_id: Some(record.id),
                            source,
                        })?;
                }
                added += 1;
            }
            offset += page.len() as u32;
        }

        Ok((note_id, added))
    }
}
