//! Per-worker delivery queue.
//!
//! `start` spawns the consumer loop. `enqueue` pushes a mutation onto the
//! channel before it returns and hands back a [`Delivery`] that resolves with
//! the outcome of the external call. One loop per worker drains the channel
//! in FIFO order, so a system sees mutations in the order they were enqueued.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use register_shared::types::{AfterhandlerType, RecordOperation};
use register_store::Record;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::WorkerError;

struct QueuedMutation {
    record: Record,
    operation: RecordOperation,
    ack: oneshot::Sender<Result<(), WorkerError>>,
}

/// Pending outcome of one enqueued mutation.
pub struct Delivery {
    kind: AfterhandlerType,
    done: oneshot::Receiver<Result<(), WorkerError>>,
}

impl Delivery {
    /// A delivery whose outcome is already known.
    pub fn ready(kind: AfterhandlerType, result: Result<(), WorkerError>) -> Self {
        let (ack, done) = oneshot::channel();
        // The receiver is held right here.
        let _ = ack.send(result);
        Self { kind, done }
    }

    pub fn kind(&self) -> AfterhandlerType {
        self.kind
    }

    /// Wait for the external call to finish.
    pub async fn outcome(self) -> Result<(), WorkerError> {
        self.done
            .await
            .map_err(|_| WorkerError::QueueClosed(self.kind))?
    }
}

pub struct WorkerQueue {
    kind: AfterhandlerType,
    tx: mpsc::UnboundedSender<QueuedMutation>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedMutation>>>,
    started: AtomicBool,
}

impl WorkerQueue {
    pub fn new(kind: AfterhandlerType) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            kind,
            tx,
            rx: Mutex::new(Some(rx)),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the consumer loop. `handler` performs the external call.
    pub async fn start<H, Fut>(&self, handler: H) -> Result<(), WorkerError>
    where
        H: Fn(Record, RecordOperation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        let mut rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or(WorkerError::AlreadyStarted(self.kind))?;
        let kind = self.kind;

        tokio::spawn(async move {
            info!(worker = %kind, "Worker loop started");
            while let Some(job) = rx.recv().await {
                let record_id = job.record.id;
                let result = handler(job.record, job.operation).await;
                match &result {
                    Ok(()) => debug!(worker = %kind, record = %record_id, "Mutation delivered"),
                    Err(e) => warn!(worker = %kind, record = %record_id, error = %e, "Mutation delivery failed"),
                }
                // The submitter may have gone away; the outcome is logged above.
                let _ = job.ack.send(result);
            }
            info!(worker = %kind, "Worker loop stopped");
        });

        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Put a mutation on the channel. The send happens before this returns,
    /// so the call order of `enqueue` is the delivery order.
    pub fn enqueue(&self, record: &Record, operation: RecordOperation) -> Delivery {
        if !self.is_started() {
            return Delivery::ready(self.kind, Err(WorkerError::QueueClosed(self.kind)));
        }

        let (ack, done) = oneshot::channel();
        let job = QueuedMutation {
            record: record.clone(),
            operation,
            ack,
        };
        if self.tx.send(job).is_err() {
            return Delivery::ready(self.kind, Err(WorkerError::QueueClosed(self.kind)));
        }
        Delivery {
            kind: self.kind,
            done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use uuid::Uuid;

    fn record() -> Record {
        let now = Utc::now();
        Record {
            id: Uuid::new_v4(),
            key_id: 1,
            register_id: 1,
            data: "{}".into(),
            is_encrypted: false,
            search_string: None,
            signature: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn enqueue_before_start_is_rejected() {
        let queue = WorkerQueue::new(AfterhandlerType::Plink);
        let delivery = queue.enqueue(&record(), RecordOperation::Create);
        let err = delivery.outcome().await.unwrap_err();
        assert!(matches!(err, WorkerError::QueueClosed(AfterhandlerType::Plink)));
    }

    #[tokio::test]
    async fn delivers_in_submission_order_and_reports_results() {
        let queue = WorkerQueue::new(AfterhandlerType::Elastic);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        queue
            .start(move |record, operation| {
                let sink = sink.clone();
                async move {
                    sink.lock().await.push((record.id, operation));
                    if operation == RecordOperation::Delete {
                        return Err(WorkerError::Rejected {
                            worker: AfterhandlerType::Elastic,
                            reason: "nope".into(),
                        });
                    }
                    Ok(())
                }
            })
            .await
            .unwrap();

        let a = record();
        let b = record();
        queue.enqueue(&a, RecordOperation::Create).outcome().await.unwrap();
        queue.enqueue(&b, RecordOperation::Update).outcome().await.unwrap();
        assert!(queue
            .enqueue(&a, RecordOperation::Delete)
            .outcome()
            .await
            .is_err());

        let seen = seen.lock().await.clone();
        assert_eq!(
            seen,
            vec![
                (a.id, RecordOperation::Create),
                (b.id, RecordOperation::Update),
                (a.id, RecordOperation::Delete),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn enqueue_order_survives_concurrent_waiters() {
        let queue = WorkerQueue::new(AfterhandlerType::Elastic);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        queue
            .start(move |record, _| {
                let sink = sink.clone();
                async move {
                    sink.lock().await.push(record.id);
                    tokio::task::yield_now().await;
                    Ok(())
                }
            })
            .await
            .unwrap();

        let records: Vec<Record> = (0..500).map(|_| record()).collect();
        let mut waiters = Vec::new();
        for r in &records {
            let delivery = queue.enqueue(r, RecordOperation::Update);
            waiters.push(tokio::spawn(delivery.outcome()));
        }
        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }

        let expected: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        assert_eq!(*seen.lock().await, expected);
    }

    #[tokio::test]
    async fn second_start_fails() {
        let queue = WorkerQueue::new(AfterhandlerType::Blockchain);
        queue.start(|_, _| async { Ok(()) }).await.unwrap();
        let err = queue.start(|_, _| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, WorkerError::AlreadyStarted(_)));
    }
}
