use register_shared::types::{AfterhandlerType, KeyId};
use register_store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Failure reported by a single worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// `validate_record` veto.
    #[error("{worker} rejected the record: {reason}")]
    Rejected {
        worker: AfterhandlerType,
        reason: String,
    },

    #[error("{worker} request failed: {source}")]
    Http {
        worker: AfterhandlerType,
        #[source]
        source: reqwest::Error,
    },

    #[error("{worker} answered HTTP {status}: {body}")]
    Status {
        worker: AfterhandlerType,
        status: u16,
        body: String,
    },

    #[error("{0} worker queue is not running")]
    QueueClosed(AfterhandlerType),

    #[error("{0} worker was already started")]
    AlreadyStarted(AfterhandlerType),

    #[error("{worker} is misconfigured: {reason}")]
    Config {
        worker: AfterhandlerType,
        reason: String,
    },
}

/// Errors of the afterhandler orchestrator.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A worker vetoed a mutation before commit.
    #[error("Worker validation failed: {0}")]
    WorkerValidation(#[source] WorkerError),

    /// A worker failed during a bulk reindex; the reindex was aborted.
    #[error("Reindex of key {key_id} aborted{}: {source}", record_suffix(.record_id))]
    ReindexWorker {
        key_id: KeyId,
        record_id: Option<Uuid>,
        #[source]
        source: WorkerError,
    },

    #[error("Key {0} is already being reindexed")]
    AlreadyReindexing(KeyId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

fn record_suffix(record_id: &Option<Uuid>) -> String {
    record_id
        .map(|id| format!(" at record {id}"))
        .unwrap_or_default()
}

/// Render an error together with its `source()` chain.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !rendered.contains(&cause_text) {
            rendered.push_str(": ");
            rendered.push_str(&cause_text);
        }
        source = cause.source();
    }
    rendered
}
