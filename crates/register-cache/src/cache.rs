//! The cache-aside wrapper.
//!
//! Every backend call is bounded by `CacheConfig::timeout`. A failing or slow
//! backend is logged and treated as a miss, so reads degrade to "always call
//! the producer" instead of failing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use register_shared::constants::{DEFAULT_CACHE_TIMEOUT_MS, DEFAULT_CACHE_TTL_SECS};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::CacheBackend;
use crate::error::CacheError;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL used when a caller doesn't pass one.
    pub default_ttl: Duration,
    /// Upper bound on any single backend call.
    pub timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            timeout: Duration::from_millis(DEFAULT_CACHE_TIMEOUT_MS),
        }
    }
}

/// A value returned by a read-through call.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub data: T,
    pub is_from_cache: bool,
}

#[derive(Clone)]
pub struct Cache {
    backend: Option<Arc<dyn CacheBackend>>,
    config: CacheConfig,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("enabled", &self.is_enabled())
            .field("config", &self.config)
            .finish()
    }
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self {
            backend: Some(backend),
            config,
        }
    }

    /// A cache with no backend: every read calls the producer.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            config: CacheConfig::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Connect the backend. Unlike every other call, failure here is returned.
    pub async fn connect(&self) -> Result<(), CacheError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        tokio::time::timeout(self.config.timeout, backend.connect())
            .await
            .map_err(|_| CacheError::Timeout(self.config.timeout))?
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let backend = self.backend.as_ref()?;
        self.bounded("get", key, backend.get(key)).await.flatten()
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let Some(backend) = &self.backend else {
            return;
        };
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        self.bounded("set", key, backend.set(key, value, ttl)).await;
    }

    pub async fn delete(&self, key: &str) {
        let Some(backend) = &self.backend else {
            return;
        };
        self.bounded("delete", key, backend.delete(key)).await;
    }

    /// Delete every key matching a `*` pattern. Returns how many were removed.
    pub async fn delete_many(&self, pattern: &str) -> usize {
        let Some(backend) = &self.backend else {
            return 0;
        };
        let Some(keys) = self.bounded("keys", pattern, backend.keys(pattern)).await else {
            return 0;
        };

        let mut removed = 0;
        for key in &keys {
            if self.bounded("delete", key, backend.delete(key)).await.is_some() {
                removed += 1;
            }
        }
        debug!(pattern, removed, "Invalidated cache entries");
        removed
    }

    /// Return the cached value under `key`, or compute, store and return it.
    ///
    /// Two concurrent misses may both run `producer`; the last write wins.
    pub async fn get_or_set<T, F, Fut, E>(
        &self,
        key: &str,
        producer: F,
        ttl: Option<Duration>,
    ) -> Result<Cached<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(raw) = self.get(key).await {
            match serde_json::from_str::<T>(&raw) {
                Ok(data) => {
                    return Ok(Cached {
                        data,
                        is_from_cache: true,
                    })
                }
                Err(e) => warn!(key, error = %e, "Discarding undecodable cache entry"),
            }
        }

        let data = producer().await?;

        if self.is_enabled() {
            match serde_json::to_string(&data) {
                Ok(raw) => self.set(key, &raw, ttl).await,
                Err(e) => warn!(key, error = %e, "Cannot serialize value for cache"),
            }
        }

        Ok(Cached {
            data,
            is_from_cache: false,
        })
    }

    /// Like [`Cache::get_or_set`], but first compares the freshness marker
    /// returned by `timestamp_fn` with the one cached next to `key`. A newer
    /// (or unknown) marker drops the entry so the producer runs again.
    pub async fn get_or_set_with_timestamp<T, TF, TFut, F, Fut, E>(
        &self,
        key: &str,
        timestamp_fn: TF,
        producer: F,
        ttl: Option<Duration>,
    ) -> Result<Cached<T>, E>
    where
        T: Serialize + DeserializeOwned,
        TF: FnOnce() -> TFut,
        TFut: Future<Output = Result<Option<DateTime<Utc>>, E>>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.is_enabled() {
            return self.get_or_set(key, producer, ttl).await;
        }

        let timestamp_key = format!("{key}.timestamp");
        let fresh = timestamp_fn().await?;
        let cached = self
            .get(&timestamp_key)
            .await
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|ts| ts.with_timezone(&Utc));

        let stale = match (fresh, cached) {
            (Some(fresh), Some(cached)) => fresh > cached,
            _ => true,
        };

        if stale {
            debug!(key, ?fresh, ?cached, "Timestamp moved, invalidating cache entry");
            self.delete(key).await;
            match fresh {
                Some(ts) => {
                    let raw = ts.to_rfc3339_opts(SecondsFormat::Nanos, true);
                    self.set(&timestamp_key, &raw, ttl).await;
                }
                None => self.delete(&timestamp_key).await,
            }
        }

        self.get_or_set(key, producer, ttl).await
    }

    /// Run a backend call under the timeout; failures become `None`.
    async fn bounded<T, Fut>(&self, op: &'static str, key: &str, call: Fut) -> Option<T>
    where
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let result = match tokio::time::timeout(self.config.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.config.timeout)),
        };

        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(op, key, error = %e, "Cache unavailable, falling through");
                None
            }
        }
    }
}
