//! Encryption state rules of keys and their records.
//!
//! A key's `is_encrypted` flag may only change while the key owns no
//! records. `process_encryption` brings existing records in line with the
//! flag, one atomic row update per record.

use std::sync::Arc;

use register_shared::types::KeyId;
use register_shared::Encryption;
use register_store::{Record, SharedDatabase};
use tracing::{debug, info};

use crate::error::ServerError;
use crate::records::search_string_of;

#[derive(Clone)]
pub struct EncryptionRules {
    db: SharedDatabase,
    engine: Option<Arc<Encryption>>,
    batch_size: u32,
}

impl EncryptionRules {
    pub fn new(db: SharedDatabase, engine: Option<Arc<Encryption>>, batch_size: u32) -> Self {
        Self {
            db,
            engine,
            batch_size: batch_size.max(1),
        }
    }

    pub fn engine(&self) -> Option<&Arc<Encryption>> {
        self.engine.as_ref()
    }

    /// The engine, or a validation error when none is configured.
    pub fn require_engine(&self) -> Result<&Arc<Encryption>, ServerError> {
        self.engine
            .as_ref()
            .ok_or_else(|| ServerError::BadRequest("No encryption key is configured".into()))
    }

    /// `true` only when the key owns zero records.
    pub async fn can_toggle_encryption(&self, key_id: KeyId) -> Result<bool, ServerError> {
        let count = self.db.lock().await.count_records_by_key_id(key_id)?;
        Ok(count == 0)
    }

    /// Re-encrypt or decrypt every record whose state disagrees with its
    /// key. Returns how many records were rewritten; a second run returns 0.
    pub async fn process_encryption(&self, key_id: KeyId) -> Result<u64, ServerError> {
        let key = self.db.lock().await.get_key(key_id)?;
        let target = key.is_encrypted;

        let mut offset = 0u32;
        let mut count = 0u64;
        loop {
            let page = self
                .db
                .lock()
                .await
                .get_records_by_key_id_with_pagination(key_id, offset, self.batch_size)?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as u32;

            for record in page.iter().filter(|r| r.is_encrypted != target) {
                let (data, search_string) = self.convert(record, target)?;
                let changed = self.db.lock().await.update_record_encryption(
                    record.id,
                    record.is_encrypted,
                    &data,
                    target,
                    search_string.as_deref(),
                )?;
                if changed {
                    count += 1;
                } else {
                    debug!(record = %record.id, "Record changed concurrently, skipped");
                }
            }
        }

        info!(key_id, encrypted = target, count, "Processed record encryption");
        Ok(count)
    }

    /// New stored payload and search string of `record` in state `encrypt`.
    fn convert(
        &self,
        record: &Record,
        encrypt: bool,
    ) -> Result<(String, Option<String>), ServerError> {
        let engine = self.require_engine()?;
        if encrypt {
            Ok((engine.encrypt(&record.data)?, None))
        } else {
            let plain = engine.decrypt(&record.data)?;
            let search_string = serde_json::from_str(&plain)
                .ok()
                .and_then(|value| search_string_of(&value));
            Ok((plain, search_string))
        }
    }
}
