//! CRUD operations for [`Record`] rows.
//!
//! Mutations coming from the API are committed together with their
//! afterhandler log row in one transaction, so a record never exists without
//! the entry the workers are synced against.

use chrono::Utc;
use register_shared::types::{KeyId, RecordOperation};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::afterhandlers::insert_afterhandler_row;
use crate::database::{format_ts, parse_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::Record;

const RECORD_COLUMNS: &str =
    "id, key_id, register_id, data, is_encrypted, search_string, signature, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Apply `operation` for `record` and log it for the afterhandler.
    ///
    /// Returns the id of the afterhandler row created for this mutation.
    pub fn commit_record_mutation(
        &mut self,
        record: &Record,
        operation: RecordOperation,
    ) -> Result<i64> {
        let tx = self.conn_mut().transaction()?;

        match operation {
            RecordOperation::Create => insert_record_row(&tx, record)?,
            RecordOperation::Update => {
                if update_record_row(&tx, record)? == 0 {
                    return Err(StoreError::NotFound);
                }
            }
            RecordOperation::Delete => {
                let affected =
                    tx.execute("DELETE FROM records WHERE id = ?1", params![record.id.to_string()])?;
                if affected == 0 {
                    return Err(StoreError::NotFound);
                }
            }
            RecordOperation::Reindex => {}
        }

        let afterhandler_id =
            insert_afterhandler_row(&tx, record.key_id, Some(record.id), operation)?;
        tx.commit()?;

        tracing::debug!(
            record = %record.id,
            key = record.key_id,
            %operation,
            afterhandler_id,
            "committed record mutation"
        );
        Ok(afterhandler_id)
    }

    /// Insert a record without logging it (seeding, imports).
    pub fn insert_record(&self, record: &Record) -> Result<()> {
        insert_record_row(self.conn(), record)
    }

    /// Re-write a record's payload only if its encryption state is still
    /// `expected_is_encrypted`. Single statement, so it is atomic per record.
    ///
    /// Returns `true` when the row changed.
    pub fn update_record_encryption(
        &self,
        id: Uuid,
        expected_is_encrypted: bool,
        data: &str,
        is_encrypted: bool,
        search_string: Option<&str>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE records
             SET data = ?3, is_encrypted = ?4, search_string = ?5, updated_at = ?6
             WHERE id = ?1 AND is_encrypted = ?2",
            params![
                id.to_string(),
                expected_is_encrypted,
                data,
                is_encrypted,
                search_string,
                format_ts(&Utc::now()),
            ],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_record(&self, id: Uuid) -> Result<Record> {
        self.conn()
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"),
                params![id.to_string()],
                row_to_record,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// One page of a key's records in creation order.
    pub fn get_records_by_key_id_with_pagination(
        &self,
        key_id: KeyId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Record>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {RECORD_COLUMNS}
             FROM records
             WHERE key_id = ?1
             ORDER BY created_at ASC, rowid ASC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(params![key_id, limit, offset], row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn count_records_by_key_id(&self, key_id: KeyId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM records WHERE key_id = ?1",
            params![key_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn insert_record_row(conn: &Connection, record: &Record) -> Result<()> {
    conn.execute(
        "INSERT INTO records (id, key_id, register_id, data, is_encrypted, search_string,
                              signature, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.id.to_string(),
            record.key_id,
            record.register_id,
            record.data,
            record.is_encrypted,
            record.search_string,
            record.signature,
            format_ts(&record.created_at),
            format_ts(&record.updated_at),
        ],
    )?;
    Ok(())
}

fn update_record_row(conn: &Connection, record: &Record) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE records
         SET data = ?2, is_encrypted = ?3, search_string = ?4, signature = ?5, updated_at = ?6
         WHERE id = ?1",
        params![
            record.id.to_string(),
            record.data,
            record.is_encrypted,
            record.search_string,
            record.signature,
            format_ts(&record.updated_at),
        ],
    )?)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let id_str: String = row.get(0)?;
    let created_str: String = row.get(7)?;
    let updated_str: String = row.get(8)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Record {
        id,
        key_id: row.get(1)?,
        register_id: row.get(2)?,
        data: row.get(3)?,
        is_encrypted: row.get(4)?,
        search_string: row.get(5)?,
        signature: row.get(6)?,
        created_at: parse_ts(7, &created_str)?,
        updated_at: parse_ts(8, &updated_str)?,
    })
}
