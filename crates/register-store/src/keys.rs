//! CRUD operations for [`Key`] rows.

use chrono::{DateTime, Utc};
use register_shared::types::KeyId;
use rusqlite::{params, OptionalExtension};

use crate::database::{format_ts, parse_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::{Key, KeyUpdate, NewKey};

const KEY_COLUMNS: &str = "id, register_id, name, schema, is_encrypted, to_string_expr,
     to_search_string_expr, to_export_expr, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new key and return the stored row.
    pub fn create_key(&self, new_key: &NewKey) -> Result<Key> {
        let now = format_ts(&Utc::now());
        self.conn().execute(
            "INSERT INTO keys (register_id, name, schema, is_encrypted, to_string_expr,
                               to_search_string_expr, to_export_expr, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                new_key.register_id,
                new_key.name,
                serde_json::to_string(&new_key.schema)?,
                new_key.is_encrypted,
                new_key.to_string,
                new_key.to_search_string,
                new_key.to_export,
                now,
            ],
        )?;
        self.get_key(self.conn().last_insert_rowid())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single key by id.
    pub fn get_key(&self, id: KeyId) -> Result<Key> {
        self.conn()
            .query_row(
                &format!("SELECT {KEY_COLUMNS} FROM keys WHERE id = ?1"),
                params![id],
                row_to_key,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Freshness marker of a key row; `None` when the key doesn't exist.
    pub fn get_key_updated_at(&self, id: KeyId) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT updated_at FROM keys WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|s| parse_ts(0, &s)).transpose()?)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Apply a partial update and bump `updated_at`.
    pub fn update_key(&self, id: KeyId, update: &KeyUpdate) -> Result<Key> {
        let mut key = self.get_key(id)?;

        if let Some(name) = &update.name {
            key.name = name.clone();
        }
        if let Some(schema) = &update.schema {
            key.schema = schema.clone();
        }
        if let Some(is_encrypted) = update.is_encrypted {
            key.is_encrypted = is_encrypted;
        }
        if update.to_string.is_some() {
            key.to_string = update.to_string.clone();
        }
        if update.to_search_string.is_some() {
            key.to_search_string = update.to_search_string.clone();
        }
        if update.to_export.is_some() {
            key.to_export = update.to_export.clone();
        }

        self.conn().execute(
            "UPDATE keys
             SET name = ?2, schema = ?3, is_encrypted = ?4, to_string_expr = ?5,
                 to_search_string_expr = ?6, to_export_expr = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                id,
                key.name,
                serde_json::to_string(&key.schema)?,
                key.is_encrypted,
                key.to_string,
                key.to_search_string,
                key.to_export,
                format_ts(&Utc::now()),
            ],
        )?;

        self.get_key(id)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<Key> {
    let schema_str: String = row.get(3)?;
    let created_str: String = row.get(8)?;
    let updated_str: String = row.get(9)?;

    let schema = serde_json::from_str(&schema_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Key {
        id: row.get(0)?,
        register_id: row.get(1)?,
        name: row.get(2)?,
        schema,
        is_encrypted: row.get(4)?,
        to_string: row.get(5)?,
        to_search_string: row.get(6)?,
        to_export: row.get(7)?,
        created_at: parse_ts(8, &created_str)?,
        updated_at: parse_ts(9, &updated_str)?,
    })
}
