//! Maps the fixed set of worker kinds to their constructors.

use std::sync::Arc;
use std::time::Duration;

use register_shared::types::AfterhandlerType;
use tracing::info;

use crate::error::WorkerError;
use crate::worker::Worker;
use crate::workers::{
    BlockchainConfig, BlockchainWorker, ElasticConfig, ElasticWorker, PlinkConfig, PlinkWorker,
};

pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(10);

/// Which external systems are configured. A `None` endpoint leaves that
/// worker out of the active set.
#[derive(Debug, Clone)]
pub struct WorkersConfig {
    pub blockchain: Option<BlockchainConfig>,
    pub elastic: Option<ElasticConfig>,
    pub plink: Option<PlinkConfig>,
    pub request_timeout: Duration,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            blockchain: None,
            elastic: None,
            plink: None,
            request_timeout: DEFAULT_WORKER_TIMEOUT,
        }
    }
}

impl WorkersConfig {
    pub fn enabled_types(&self) -> Vec<AfterhandlerType> {
        AfterhandlerType::ALL
            .into_iter()
            .filter(|kind| match kind {
                AfterhandlerType::Blockchain => self.blockchain.is_some(),
                AfterhandlerType::Elastic => self.elastic.is_some(),
                AfterhandlerType::Plink => self.plink.is_some(),
            })
            .collect()
    }
}

/// Build the active workers in their fixed order. All workers share one
/// HTTP client bounded by `request_timeout`.
pub fn build_workers(config: &WorkersConfig) -> Result<Vec<Arc<dyn Worker>>, WorkerError> {
    let enabled = config.enabled_types();
    let Some(&first) = enabled.first() else {
        info!("No external workers configured");
        return Ok(Vec::new());
    };

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| WorkerError::Config {
            worker: first,
            reason: e.to_string(),
        })?;

    let mut workers: Vec<Arc<dyn Worker>> = Vec::with_capacity(enabled.len());
    for kind in enabled {
        let worker: Arc<dyn Worker> = match kind {
            AfterhandlerType::Blockchain => match &config.blockchain {
                Some(c) => Arc::new(BlockchainWorker::new(client.clone(), c)),
                None => continue,
            },
            AfterhandlerType::Elastic => match &config.elastic {
                Some(c) => Arc::new(ElasticWorker::new(client.clone(), c)),
                None => continue,
            },
            AfterhandlerType::Plink => match &config.plink {
                Some(c) => Arc::new(PlinkWorker::new(client.clone(), c)),
                None => continue,
            },
        };
        info!(worker = %kind, "Worker enabled");
        workers.push(worker);
    }
    Ok(workers)
}
