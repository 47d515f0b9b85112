//! Record reads and writes.
//!
//! Writes go through the workers' veto, then commit together with their
//! afterhandler row, then fan out in the background. Payloads of encrypted
//! keys are sealed before they reach the store, and every read decrypts, so
//! callers only ever see plaintext JSON.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use register_shared::types::{KeyId, RecordOperation, RegisterId};
use register_store::{Record, SharedDatabase};
use register_sync::Afterhandler;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::encryption::EncryptionRules;
use crate::error::ServerError;
use crate::keys::KeyService;

/// A record as returned to API callers: data is always plaintext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordView {
    pub id: Uuid,
    pub key_id: KeyId,
    pub register_id: RegisterId,
    pub data: Value,
    pub is_encrypted: bool,
    pub search_string: Option<String>,
    pub signature: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lowercased scalar leaves of `value`, space separated.
pub(crate) fn search_string_of(value: &Value) -> Option<String> {
    fn collect(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(s) if !s.trim().is_empty() => out.push(s.trim().to_lowercase()),
            Value::Number(n) => out.push(n.to_string()),
            Value::Bool(b) => out.push(b.to_string()),
            Value::Array(items) => items.iter().for_each(|v| collect(v, out)),
            Value::Object(map) => map.values().for_each(|v| collect(v, out)),
            _ => {}
        }
    }

    let mut parts = Vec::new();
    collect(value, &mut parts);
    (!parts.is_empty()).then(|| parts.join(" "))
}

#[derive(Clone)]
pub struct RecordService {
    db: SharedDatabase,
    keys: KeyService,
    rules: EncryptionRules,
    afterhandler: Arc<Afterhandler>,
}

impl RecordService {
    pub fn new(
        db: SharedDatabase,
        keys: KeyService,
        rules: EncryptionRules,
        afterhandler: Arc<Afterhandler>,
    ) -> Self {
        Self {
            db,
            keys,
            rules,
            afterhandler,
        }
    }

    pub async fn create(
        &self,
        key_id: KeyId,
        data: Value,
        signature: Option<String>,
    ) -> Result<RecordView, ServerError> {
        let key = self.keys.get(key_id).await?.data;
        let now = Utc::now();
        let record = self.seal(
            Record {
                id: Uuid::new_v4(),
                key_id,
                register_id: key.register_id,
                data: String::new(),
                is_encrypted: false,
                search_string: None,
                signature,
                created_at: now,
                updated_at: now,
            },
            &data,
            key.is_encrypted,
        )?;

        self.commit(&record, RecordOperation::Create).await?;
        Ok(self.view(record, data))
    }

    pub async fn update(
        &self,
        id: Uuid,
        data: Value,
        signature: Option<String>,
    ) -> Result<RecordView, ServerError> {
        let existing = self.load(id).await?;
        let key = self.keys.get(existing.key_id).await?.data;
        let record = self.seal(
            Record {
                signature: signature.or(existing.signature),
                updated_at: Utc::now(),
                ..existing
            },
            &data,
            key.is_encrypted,
        )?;

        self.commit(&record, RecordOperation::Update).await?;
        Ok(self.view(record, data))
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ServerError> {
        let record = self.load(id).await?;
        self.commit(&record, RecordOperation::Delete).await
    }

    pub async fn get(&self, id: Uuid) -> Result<RecordView, ServerError> {
        let record = self.load(id).await?;
        self.open(record)
    }

    pub async fn list(
        &self,
        key_id: KeyId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<RecordView>, ServerError> {
        self.keys.get(key_id).await?;
        let page = self
            .db
            .lock()
            .await
            .get_records_by_key_id_with_pagination(key_id, offset, limit)?;
        page.into_iter().map(|r| self.open(r)).collect()
    }

    async fn load(&self, id: Uuid) -> Result<Record, ServerError> {
        self.db
            .lock()
            .await
            .get_record(id)
            .map_err(|e| match ServerError::from(e) {
                ServerError::NotFound(_) => ServerError::NotFound(format!("Record {id}")),
                other => other,
            })
    }

    /// Veto, commit with its afterhandler row, then fan out off the request
    /// path. The mutation is queued before the store lock is released, so
    /// workers receive mutations in commit order.
    async fn commit(&self, record: &Record, operation: RecordOperation) -> Result<(), ServerError> {
        self.afterhandler.validate_record(record, operation).await?;

        let mut db = self.db.lock().await;
        let afterhandler_id = db.commit_record_mutation(record, operation)?;
        info!(record = %record.id, key_id = record.key_id, %operation, "Record committed");
        self.afterhandler
            .spawn_handle_record(afterhandler_id, record, operation);
        drop(db);
        Ok(())
    }

    /// Fill the stored payload of `record` from `data`, encrypting when the
    /// key requires it.
    fn seal(&self, mut record: Record, data: &Value, encrypt: bool) -> Result<Record, ServerError> {
        if !data.is_object() {
            return Err(ServerError::BadRequest("Record data must be a JSON object".into()));
        }
        let plain = data.to_string();

        if encrypt {
            record.data = self.rules.require_engine()?.encrypt(&plain)?;
            record.is_encrypted = true;
            record.search_string = None;
        } else {
            record.data = plain;
            record.is_encrypted = false;
            record.search_string = search_string_of(data);
        }
        Ok(record)
    }

    /// Decrypt (when needed) and parse a stored record.
    fn open(&self, record: Record) -> Result<RecordView, ServerError> {
        let plain = if record.is_encrypted {
            debug!(record = %record.id, "Decrypting record");
            self.rules.require_engine()?.decrypt(&record.data)?
        } else {
            record.data.clone()
        };
        let data = serde_json::from_str(&plain).map_err(|e| {
            ServerError::Internal(format!("Stored record {} is not JSON: {e}", record.id))
        })?;
        Ok(self.view(record, data))
    }

    fn view(&self, record: Record, data: Value) -> RecordView {
        RecordView {
            id: record.id,
            key_id: record.key_id,
            register_id: record.register_id,
            data,
            is_encrypted: record.is_encrypted,
            search_string: record.search_string,
            signature: record.signature,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_string_collects_leaves() {
        let value = json!({"name": "Alice Smith", "age": 42, "tags": ["VIP", ""], "note": null});
        let search = search_string_of(&value).unwrap();
        assert!(search.contains("alice smith"));
        assert!(search.contains("42"));
        assert!(search.contains("vip"));
        assert!(search_string_of(&json!({})).is_none());
    }
}
