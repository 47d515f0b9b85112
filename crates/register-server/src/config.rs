//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero configuration
//! for local development: no encryption key, in-process cache, no workers.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use register_cache::CacheConfig;
use register_shared::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_CACHE_TIMEOUT_MS, DEFAULT_CACHE_TTL_SECS, DEFAULT_HTTP_PORT,
    DEFAULT_IV_LENGTH, DEFAULT_REINDEX_SETTLE_SECS,
};
use register_shared::Encryption;
use register_sync::registry::DEFAULT_WORKER_TIMEOUT;
use register_sync::workers::{BlockchainConfig, ElasticConfig, PlinkConfig};
use register_sync::{AfterhandlerConfig, WorkersConfig};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./data/register.db`
    pub database_path: PathBuf,

    /// Record payload encryption engine. `None` means keys cannot be
    /// switched to encrypted.
    /// Env: `ENCRYPTION_KEY` (64 hex chars), `ENCRYPTION_IV_LENGTH` (12 or 24)
    pub encryption: Option<Encryption>,

    /// Use the in-process cache backend.
    /// Env: `CACHE_ENABLED` (true/false)
    /// Default: `true`
    pub cache_enabled: bool,

    /// Env: `CACHE_TTL_SECS`, `CACHE_TIMEOUT_MS`
    pub cache: CacheConfig,

    /// Page size of the encryption batch job.
    /// Env: `ENCRYPTION_BATCH_SIZE`
    /// Default: `100`
    pub encryption_batch_size: u32,

    /// Env: `REINDEX_PAGE_SIZE`, `REINDEX_SETTLE_SECS`
    pub afterhandler: AfterhandlerConfig,

    /// Env: `WORKER_TIMEOUT_MS`, `BLOCKCHAIN_URL`, `ELASTIC_URL`,
    /// `ELASTIC_INDEX_PREFIX`, `ELASTIC_MAX_DOCUMENT_BYTES`, `PLINK_URL`
    pub workers: WorkersConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./data/register.db"),
            encryption: None,
            cache_enabled: true,
            cache: CacheConfig {
                default_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
                timeout: Duration::from_millis(DEFAULT_CACHE_TIMEOUT_MS),
            },
            encryption_batch_size: DEFAULT_BATCH_SIZE,
            afterhandler: AfterhandlerConfig {
                page_size: DEFAULT_BATCH_SIZE,
                settle_delay: Duration::from_secs(DEFAULT_REINDEX_SETTLE_SECS),
            },
            workers: WorkersConfig {
                request_timeout: DEFAULT_WORKER_TIMEOUT,
                ..Default::default()
            },
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = parsed::<SocketAddr, _>(&lookup, "HTTP_ADDR") {
            config.http_addr = addr;
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        let iv_length = parsed::<usize, _>(&lookup, "ENCRYPTION_IV_LENGTH").unwrap_or(DEFAULT_IV_LENGTH);
        if let Some(hex_key) = lookup("ENCRYPTION_KEY").filter(|k| !k.trim().is_empty()) {
            match Encryption::from_hex(&hex_key, iv_length) {
                Ok(engine) => config.encryption = Some(engine),
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid ENCRYPTION_KEY, record encryption disabled");
                }
            }
        }

        if let Some(val) = lookup("CACHE_ENABLED") {
            config.cache_enabled = val != "false" && val != "0";
        }
        if let Some(secs) = parsed::<u64, _>(&lookup, "CACHE_TTL_SECS") {
            config.cache.default_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parsed::<u64, _>(&lookup, "CACHE_TIMEOUT_MS") {
            config.cache.timeout = Duration::from_millis(ms);
        }

        if let Some(n) = parsed::<u32, _>(&lookup, "ENCRYPTION_BATCH_SIZE").filter(|n| *n > 0) {
            config.encryption_batch_size = n;
        }
        if let Some(n) = parsed::<u32, _>(&lookup, "REINDEX_PAGE_SIZE").filter(|n| *n > 0) {
            config.afterhandler.page_size = n;
        }
        if let Some(secs) = parsed::<u64, _>(&lookup, "REINDEX_SETTLE_SECS") {
            config.afterhandler.settle_delay = Duration::from_secs(secs);
        }

        if let Some(ms) = parsed::<u64, _>(&lookup, "WORKER_TIMEOUT_MS") {
            config.workers.request_timeout = Duration::from_millis(ms);
        }
        if let Some(url) = non_empty(&lookup, "BLOCKCHAIN_URL") {
            config.workers.blockchain = Some(BlockchainConfig { url });
        }
        if let Some(url) = non_empty(&lookup, "ELASTIC_URL") {
            let mut elastic = ElasticConfig::new(url);
            if let Some(prefix) = non_empty(&lookup, "ELASTIC_INDEX_PREFIX") {
                elastic.index_prefix = prefix;
            }
            if let Some(max) = parsed::<usize, _>(&lookup, "ELASTIC_MAX_DOCUMENT_BYTES") {
                elastic.max_document_bytes = max;
            }
            config.workers.elastic = Some(elastic);
        }
        if let Some(url) = non_empty(&lookup, "PLINK_URL") {
            config.workers.plink = Some(PlinkConfig { url });
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn non_empty<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|v| !v.trim().is_empty())
}

/// Parse `name`, warning and returning `None` when the value is unusable.
fn parsed<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}
