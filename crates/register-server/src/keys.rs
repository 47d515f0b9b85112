//! Key metadata with cache-aside reads.
//!
//! `key:{id}` holds the serialized key; reads are validated against the row's
//! `updated_at` so a write made by another instance is never served stale.
//! Every write invalidates the key's entries.

use register_cache::{cache_key, Cache, Cached};
use register_shared::types::KeyId;
use register_store::{Key, KeyUpdate, NewKey, SharedDatabase};
use tracing::info;

use crate::encryption::EncryptionRules;
use crate::error::ServerError;

#[derive(Clone)]
pub struct KeyService {
    db: SharedDatabase,
    cache: Cache,
    rules: EncryptionRules,
}

impl KeyService {
    pub fn new(db: SharedDatabase, cache: Cache, rules: EncryptionRules) -> Self {
        Self { db, cache, rules }
    }

    pub async fn create(&self, new_key: &NewKey) -> Result<Key, ServerError> {
        if new_key.name.trim().is_empty() {
            return Err(ServerError::BadRequest("Key name must not be empty".into()));
        }
        if new_key.is_encrypted {
            self.rules.require_engine()?;
        }
        let key = self.db.lock().await.create_key(new_key)?;
        info!(key_id = key.id, encrypted = key.is_encrypted, "Key created");
        Ok(key)
    }

    pub async fn get(&self, id: KeyId) -> Result<Cached<Key>, ServerError> {
        let db = self.db.clone();
        let timestamp_db = self.db.clone();
        self.cache
            .get_or_set_with_timestamp(
                &cache_key!("key", id),
                move || async move {
                    Ok::<_, ServerError>(timestamp_db.lock().await.get_key_updated_at(id)?)
                },
                move || async move {
                    db.lock().await.get_key(id).map_err(|e| match ServerError::from(e) {
                        ServerError::NotFound(_) => ServerError::NotFound(format!("Key {id}")),
                        other => other,
                    })
                },
                None,
            )
            .await
    }

    /// Apply `update`. Changing `is_encrypted` is refused once the key owns
    /// records.
    pub async fn update(&self, id: KeyId, update: &KeyUpdate) -> Result<Key, ServerError> {
        let current = self.get(id).await?.data;

        if let Some(wanted) = update.is_encrypted.filter(|w| *w != current.is_encrypted) {
            if !self.rules.can_toggle_encryption(id).await? {
                return Err(ServerError::BadRequest(
                    "Encryption can only be changed on a key without records".into(),
                ));
            }
            if wanted {
                self.rules.require_engine()?;
            }
        }

        let key = self.db.lock().await.update_key(id, update)?;
        self.invalidate(id).await;
        info!(key_id = id, encrypted = key.is_encrypted, "Key updated");
        Ok(key)
    }

    /// Drop every cache entry derived from key `id`.
    pub async fn invalidate(&self, id: KeyId) {
        let base = cache_key!("key", id);
        for pattern in [base.clone(), format!("{base}.*"), format!("{base}:*")] {
            self.cache.delete_many(&pattern).await;
        }
    }
}
