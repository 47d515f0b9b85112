//! Domain model structs persisted in the register database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! straight to the HTTP layer or to a worker.

use chrono::{DateTime, Utc};
use register_shared::types::{KeyId, RecordOperation, RegisterId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// A register schema unit. Records are validated against `schema`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Key {
    pub id: KeyId,
    pub register_id: RegisterId,
    pub name: String,
    /// JSON Schema of the records owned by this key.
    pub schema: serde_json::Value,
    /// Whether record payloads of this key are stored encrypted.
    pub is_encrypted: bool,
    /// Display expressions, stored verbatim and never evaluated here.
    pub to_string: Option<String>,
    pub to_search_string: Option<String>,
    pub to_export: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`Database::create_key`](crate::Database::create_key).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewKey {
    pub register_id: RegisterId,
    pub name: String,
    #[serde(default)]
    pub schema: serde_json::Value,
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default)]
    pub to_string: Option<String>,
    #[serde(default)]
    pub to_search_string: Option<String>,
    #[serde(default)]
    pub to_export: Option<String>,
}

/// Partial update of a key. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyUpdate {
    pub name: Option<String>,
    pub schema: Option<serde_json::Value>,
    pub is_encrypted: Option<bool>,
    pub to_string: Option<String>,
    pub to_search_string: Option<String>,
    pub to_export: Option<String>,
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A record as it sits in the `records` table.
///
/// `data` is raw JSON text, or a packed ciphertext when `is_encrypted` is
/// set. Readers go through the record service, which decrypts first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    pub id: Uuid,
    pub key_id: KeyId,
    pub register_id: RegisterId,
    pub data: String,
    /// Encryption state the payload was actually written with.
    pub is_encrypted: bool,
    /// Derived search text; `None` for encrypted records.
    pub search_string: Option<String>,
    pub signature: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Afterhandler
// ---------------------------------------------------------------------------

/// One entry of the sync log: a record mutation handed to the workers, or a
/// key-level note such as a running reindex.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AfterhandlerRow {
    pub id: i64,
    pub key_id: KeyId,
    pub record_id: Option<Uuid>,
    pub operation: RecordOperation,
    pub is_synced: bool,
    pub sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
