//! The contract between the afterhandler and one external system.

use async_trait::async_trait;
use register_shared::types::{AfterhandlerType, KeyId, RecordOperation};
use register_store::Record;
use serde::{Deserialize, Serialize};

use crate::error::WorkerError;
use crate::workers::queue::Delivery;

/// Options of a manual reindex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexOptions {
    /// Restrict the reindex to these systems. `None` means every active one.
    #[serde(default)]
    pub types: Option<Vec<AfterhandlerType>>,
}

impl ReindexOptions {
    pub fn includes(&self, kind: AfterhandlerType) -> bool {
        self.types
            .as_ref()
            .map(|types| types.contains(&kind))
            .unwrap_or(true)
    }
}

/// One external system kept in sync with the register.
///
/// Workers never share mutable state with each other; every call for one
/// worker is independent of calls made to the others.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Static identity, used for configuration and reindex filtering.
    fn afterhandler_type(&self) -> AfterhandlerType;

    /// Spawn the worker's background loop and return without blocking.
    async fn start(&self) -> Result<(), WorkerError>;

    /// Called before a mutation is committed. An error vetoes the mutation
    /// for every worker.
    async fn validate_record(
        &self,
        record: &Record,
        operation: RecordOperation,
    ) -> Result<(), WorkerError>;

    /// Queue a committed mutation for propagation. The mutation must be on
    /// the worker's queue when this returns; the [`Delivery`] resolves once
    /// the external call is done.
    fn handle_record(&self, record: &Record, operation: RecordOperation) -> Delivery;

    /// Clear or restart the external representation of a key before a bulk
    /// reindex.
    async fn reindex_reset(&self, key_id: KeyId, options: &ReindexOptions)
        -> Result<(), WorkerError>;

    /// Push one record. Must be an idempotent upsert: retried pages overlap.
    async fn reindex_add(&self, record: &Record) -> Result<(), WorkerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_without_types_include_everything() {
        let options = ReindexOptions::default();
        for kind in AfterhandlerType::ALL {
            assert!(options.includes(kind));
        }
    }

    #[test]
    fn options_filter_by_type() {
        let options: ReindexOptions = serde_json::from_str(r#"{"types":["elastic"]}"#).unwrap();
        assert!(options.includes(AfterhandlerType::Elastic));
        assert!(!options.includes(AfterhandlerType::Blockchain));
        assert!(!options.includes(AfterhandlerType::Plink));
    }
}
