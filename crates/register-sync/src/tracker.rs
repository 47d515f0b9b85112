//! Per-key reindex status.
//!
//! With a cache configured the status lives there (so several instances
//! see it) under `reindex:{keyId}` with a 24 hour expiry. Without one it
//! lives in a process-local map with the same expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use register_cache::Cache;
use register_shared::constants::{REINDEX_STATUS_STARTED, REINDEX_STATUS_TTL_SECS};
use register_shared::types::KeyId;
use tracing::{debug, warn};

const STATUS_TTL: Duration = Duration::from_secs(REINDEX_STATUS_TTL_SECS);

#[derive(Debug, Clone)]
pub enum ReindexTracker {
    Distributed(Cache),
    Local(Arc<Mutex<HashMap<KeyId, Instant>>>),
}

impl ReindexTracker {
    /// Track in `cache` when it has a backend, locally otherwise.
    pub fn for_cache(cache: &Cache) -> Self {
        if cache.is_enabled() {
            Self::Distributed(cache.clone())
        } else {
            Self::local()
        }
    }

    pub fn local() -> Self {
        Self::Local(Arc::default())
    }

    /// A panic while holding the map leaves plain entries behind, so the map
    /// stays usable after poisoning.
    fn entries(map: &Mutex<HashMap<KeyId, Instant>>) -> MutexGuard<'_, HashMap<KeyId, Instant>> {
        map.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            warn!("Reindex status map was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn status_key(key_id: KeyId) -> String {
        format!("reindex:{key_id}")
    }

    pub async fn start(&self, key_id: KeyId) {
        match self {
            Self::Distributed(cache) => {
                cache
                    .set(
                        &Self::status_key(key_id),
                        REINDEX_STATUS_STARTED,
                        Some(STATUS_TTL),
                    )
                    .await
            }
            Self::Local(map) => {
                Self::entries(map).insert(key_id, Instant::now() + STATUS_TTL);
            }
        }
        debug!(key_id, "Reindex status set");
    }

    pub async fn stop(&self, key_id: KeyId) {
        match self {
            Self::Distributed(cache) => cache.delete(&Self::status_key(key_id)).await,
            Self::Local(map) => {
                Self::entries(map).remove(&key_id);
            }
        }
        debug!(key_id, "Reindex status cleared");
    }

    pub async fn is_reindexing(&self, key_id: KeyId) -> bool {
        match self {
            Self::Distributed(cache) => cache
                .get(&Self::status_key(key_id))
                .await
                .is_some_and(|status| status == REINDEX_STATUS_STARTED),
            Self::Local(map) => {
                let mut map = Self::entries(map);
                match map.get(&key_id) {
                    Some(expires_at) if Instant::now() < *expires_at => true,
                    Some(_) => {
                        map.remove(&key_id);
                        false
                    }
                    None => false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use register_cache::{CacheConfig, MemoryBackend};

    async fn lifecycle(tracker: ReindexTracker) {
        assert!(!tracker.is_reindexing(1).await);
        tracker.start(1).await;
        assert!(tracker.is_reindexing(1).await);
        assert!(!tracker.is_reindexing(2).await);
        tracker.stop(1).await;
        assert!(!tracker.is_reindexing(1).await);
    }

    #[tokio::test]
    async fn local_lifecycle() {
        lifecycle(ReindexTracker::local()).await;
    }

    #[tokio::test]
    async fn distributed_lifecycle() {
        let backend = MemoryBackend::new();
        let cache = Cache::new(Arc::new(backend.clone()), CacheConfig::default());
        let tracker = ReindexTracker::for_cache(&cache);
        assert!(matches!(tracker, ReindexTracker::Distributed(_)));

        tracker.start(4).await;
        // Visible to another tracker sharing the backend.
        let other = ReindexTracker::for_cache(&Cache::new(
            Arc::new(backend.clone()),
            CacheConfig::default(),
        ));
        assert!(other.is_reindexing(4).await);

        lifecycle(tracker).await;
    }

    #[tokio::test]
    async fn disabled_cache_falls_back_to_local() {
        let tracker = ReindexTracker::for_cache(&Cache::disabled());
        assert!(matches!(tracker, ReindexTracker::Local(_)));
        lifecycle(tracker).await;
    }

    #[tokio::test]
    async fn expired_local_status_is_dropped() {
        let tracker = ReindexTracker::local();
        if let ReindexTracker::Local(map) = &tracker {
            map.lock().unwrap().insert(3, Instant::now());
        }
        assert!(!tracker.is_reindexing(3).await);
    }

    #[tokio::test]
    async fn poisoned_local_map_keeps_tracking() {
        let tracker = ReindexTracker::local();
        let ReindexTracker::Local(map) = &tracker else {
            unreachable!()
        };
        let shared = map.clone();
        let _ = std::thread::spawn(move || {
            let mut entries = shared.lock().unwrap();
            entries.insert(8, Instant::now() + STATUS_TTL);
            panic!("worker died mid-update");
        })
        .join();
        assert!(map.is_poisoned());

        assert!(tracker.is_reindexing(8).await);
        tracker.stop(8).await;
        assert!(!tracker.is_reindexing(8).await);
        lifecycle(tracker).await;
    }
}
