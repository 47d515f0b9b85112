//! # register-server
//!
//! HTTP service in front of the register store.
//!
//! This binary wires together:
//! - the **SQLite store** holding keys, records and the afterhandler log
//! - the **encryption engine** sealing record payloads of encrypted keys
//! - the **cache-aside layer** for key metadata and reindex status
//! - the **afterhandler** fanning record mutations out to the configured
//!   external systems and running manual reindexes
//! - the **REST API** (axum)

mod api;
mod config;
mod encryption;
mod error;
mod keys;
mod records;

use std::sync::Arc;

use register_cache::{Cache, MemoryBackend};
use register_store::Database;
use register_sync::{build_workers, Afterhandler, ReindexTracker};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::encryption::EncryptionRules;
use crate::keys::KeyService;
use crate::records::RecordService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,register_server=debug")),
        )
        .init();

    info!("Starting register server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?.into_shared();
    let engine = config.encryption.clone().map(Arc::new);

    let memory_backend = MemoryBackend::new();
    let cache = if config.cache_enabled {
        Cache::new(Arc::new(memory_backend.clone()), config.cache.clone())
    } else {
        Cache::disabled()
    };
    // The only cache failure allowed to stop startup.
    cache.connect().await?;

    let tracker = ReindexTracker::for_cache(&cache);
    let workers = build_workers(&config.workers)?;
    let afterhandler = Arc::new(Afterhandler::new(
        workers,
        db.clone(),
        tracker,
        config.afterhandler.clone(),
    ));
    afterhandler.start().await?;

    let rules = EncryptionRules::new(db.clone(), engine, config.encryption_batch_size);
    if rules.engine().is_none() {
        warn!("No ENCRYPTION_KEY configured; keys cannot be switched to encrypted");
    }
    let keys = KeyService::new(db.clone(), cache.clone(), rules.clone());
    let records = RecordService::new(db.clone(), keys.clone(), rules.clone(), afterhandler.clone());

    let app_state = AppState {
        db,
        keys,
        records,
        rules,
        afterhandler,
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic eviction of expired cache entries (every minute)
    if config.cache_enabled {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                memory_backend.purge_expired().await;
            }
        });
    }

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
