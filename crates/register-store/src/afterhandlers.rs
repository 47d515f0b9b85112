//! The afterhandler sync log.
//!
//! Each record mutation gets a row that the orchestrator marks synced (with or
//! without an error) once the workers have seen it. Reindex progress notes and
//! failures are written onto the key's most recent row.

use chrono::Utc;
use register_shared::types::{KeyId, RecordOperation};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::database::{format_ts, parse_ts, Database};
use crate::error::Result;
use crate::models::AfterhandlerRow;

const AFTERHANDLER_COLUMNS: &str =
    "id, key_id, record_id, operation, is_synced, sync_error, created_at, updated_at";

impl Database {
    /// Log a mutation outside of a record transaction.
    pub fn insert_afterhandler(
        &self,
        key_id: KeyId,
        record_id: Option<Uuid>,
        operation: RecordOperation,
    ) -> Result<i64> {
        insert_afterhandler_row(self.conn(), key_id, record_id, operation)
    }

    pub fn get_afterhandler(&self, id: i64) -> Result<Option<AfterhandlerRow>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {AFTERHANDLER_COLUMNS} FROM afterhandlers WHERE id = ?1"),
                params![id],
                row_to_afterhandler,
            )
            .optional()?)
    }

    /// Most recent log row of a key, if any.
    pub fn get_last_afterhandler_by_key_id(&self, key_id: KeyId) -> Result<Option<AfterhandlerRow>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {AFTERHANDLER_COLUMNS} FROM afterhandlers
                     WHERE key_id = ?1 ORDER BY id DESC LIMIT 1"
                ),
                params![key_id],
                row_to_afterhandler,
            )
            .optional()?)
    }

    /// Mark a row synced without error.
    pub fn mark_afterhandler_synced(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE afterhandlers SET is_synced = 1, sync_error = NULL, updated_at = ?2
             WHERE id = ?1",
            params![id, format_ts(&Utc::now())],
        )?;
        Ok(())
    }

    /// Drop the error marker of a row.
    pub fn clear_afterhandler_error(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE afterhandlers SET sync_error = NULL, updated_at = ?2 WHERE id = ?1",
            params![id, format_ts(&Utc::now())],
        )?;
        Ok(())
    }

    /// Mark a row processed and attach `message` to it.
    pub fn set_afterhandler_synced_with_error(&self, id: i64, message: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE afterhandlers SET is_synced = 1, sync_error = ?2, updated_at = ?3
             WHERE id = ?1",
            params![id, message, format_ts(&Utc::now())],
        )?;
        Ok(())
    }

    /// Attach `message` to the key's most recent row, creating a key-level
    /// row when the key has no history yet. Returns the row id written.
    pub fn set_afterhandler_synced_with_error_by_key_id(
        &self,
        key_id: KeyId,
        message: &str,
    ) -> Result<i64> {
        let id = match self.get_last_afterhandler_by_key_id(key_id)? {
            Some(row) => row.id,
            None => self.insert_afterhandler(key_id, None, RecordOperation::Reindex)?,
        };
        self.set_afterhandler_synced_with_error(id, message)?;
        Ok(id)
    }

    /// Put a progress note on the key's most recent row without touching its
    /// sync state, so a pending mutation still gets its own fan-out outcome.
    /// Creates a key-level row when the key has no history yet.
    pub fn note_afterhandler_by_key_id(&self, key_id: KeyId, note: &str) -> Result<i64> {
        let id = match self.get_last_afterhandler_by_key_id(key_id)? {
            Some(row) => row.id,
            None => self.insert_afterhandler(key_id, None, RecordOperation::Reindex)?,
        };
        self.conn().execute(
            "UPDATE afterhandlers SET sync_error = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, note, format_ts(&Utc::now())],
        )?;
        Ok(id)
    }

    /// Drop `note` from a row if the row still carries it. Returns whether
    /// anything was cleared.
    pub fn clear_afterhandler_note(&self, id: i64, note: &str) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE afterhandlers SET sync_error = NULL, updated_at = ?3
             WHERE id = ?1 AND sync_error = ?2",
            params![id, note, format_ts(&Utc::now())],
        )?;
        Ok(changed > 0)
    }
}

pub(crate) fn insert_afterhandler_row(
    conn: &Connection,
    key_id: KeyId,
    record_id: Option<Uuid>,
    operation: RecordOperation,
) -> Result<i64> {
    let now = format_ts(&Utc::now());
    conn.execute(
        "INSERT INTO afterhandlers (key_id, record_id, operation, is_synced, created_at, updated_at)
         VALUES (?1, ?2, ?3, 0, ?4, ?4)",
        params![
            key_id,
            record_id.map(|id| id.to_string()),
            operation.as_str(),
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_afterhandler(row: &rusqlite::Row<'_>) -> rusqlite::Result<AfterhandlerRow> {
    let record_id_str: Option<String> = row.get(2)?;
    let operation_str: String = row.get(3)?;
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;

    let record_id = record_id_str
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let operation = RecordOperation::parse(&operation_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown operation '{operation_str}'").into(),
        )
    })?;

    Ok(AfterhandlerRow {
        id: row.get(0)?,
        key_id: row.get(1)?,
        record_id,
        operation,
        is_synced: row.get(4)?,
        sync_error: row.get(5)?,
        created_at: parse_ts(6, &created_str)?,
        updated_at: parse_ts(7, &updated_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("afterhandlers.db")).unwrap();
        (db, dir)
    }

    #[test]
    fn last_row_is_most_recent() {
        let (db, _dir) = open();
        assert!(db.get_last_afterhandler_by_key_id(1).unwrap().is_none());

        db.insert_afterhandler(1, Some(Uuid::new_v4()), RecordOperation::Create)
            .unwrap();
        let second = db
            .insert_afterhandler(1, Some(Uuid::new_v4()), RecordOperation::Update)
            .unwrap();
        db.insert_afterhandler(2, None, RecordOperation::Create).unwrap();

        let last = db.get_last_afterhandler_by_key_id(1).unwrap().unwrap();
        assert_eq!(last.id, second);
        assert_eq!(last.operation, RecordOperation::Update);
        assert!(!last.is_synced);
    }

    #[test]
    fn error_lifecycle() {
        let (db, _dir) = open();
        let id = db.insert_afterhandler(5, None, RecordOperation::Create).unwrap();

        db.set_afterhandler_synced_with_error(id, "elastic: connection refused")
            .unwrap();
        let row = db.get_afterhandler(id).unwrap().unwrap();
        assert!(row.is_synced);
        assert_eq!(row.sync_error.as_deref(), Some("elastic: connection refused"));

        db.clear_afterhandler_error(id).unwrap();
        let row = db.get_afterhandler(id).unwrap().unwrap();
        assert!(row.sync_error.is_none());

        db.set_afterhandler_synced_with_error(id, "again").unwrap();
        db.mark_afterhandler_synced(id).unwrap();
        assert!(db.get_afterhandler(id).unwrap().unwrap().sync_error.is_none());
    }

    #[test]
    fn by_key_id_creates_key_level_row_when_empty() {
        let (db, _dir) = open();
        let id = db
            .set_afterhandler_synced_with_error_by_key_id(9, "Reindex started")
            .unwrap();

        let row = db.get_last_afterhandler_by_key_id(9).unwrap().unwrap();
        assert_eq!(row.id, id);
        assert_eq!(row.record_id, None);
        assert_eq!(row.operation, RecordOperation::Reindex);
        assert_eq!(row.sync_error.as_deref(), Some("Reindex started"));

        // A second note lands on the same row.
        let again = db
            .set_afterhandler_synced_with_error_by_key_id(9, "Reindex started")
            .unwrap();
        assert_eq!(again, id);
    }

    #[test]
    fn note_leaves_pending_row_pending() {
        let (db, _dir) = open();
        let id = db
            .insert_afterhandler(3, Some(Uuid::new_v4()), RecordOperation::Update)
            .unwrap();

        assert_eq!(db.note_afterhandler_by_key_id(3, "Reindex started").unwrap(), id);
        let row = db.get_afterhandler(id).unwrap().unwrap();
        assert!(!row.is_synced);
        assert_eq!(row.sync_error.as_deref(), Some("Reindex started"));

        let fresh = db.note_afterhandler_by_key_id(4, "Reindex started").unwrap();
        let row = db.get_afterhandler(fresh).unwrap().unwrap();
        assert_eq!(row.operation, RecordOperation::Reindex);
    }

    #[test]
    fn clearing_a_note_keeps_later_errors() {
        let (db, _dir) = open();
        let id = db.note_afterhandler_by_key_id(6, "Reindex started").unwrap();

        db.set_afterhandler_synced_with_error(id, "blockchain: offline")
            .unwrap();
        assert!(!db.clear_afterhandler_note(id, "Reindex started").unwrap());
        let row = db.get_afterhandler(id).unwrap().unwrap();
        assert_eq!(row.sync_error.as_deref(), Some("blockchain: offline"));

        db.note_afterhandler_by_key_id(6, "Reindex started").unwrap();
        assert!(db.clear_afterhandler_note(id, "Reindex started").unwrap());
        assert!(db.get_afterhandler(id).unwrap().unwrap().sync_error.is_none());
    }
}
