//! v001 -- Initial schema creation.
//!
//! Creates `keys`, `records` and `afterhandlers`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Keys (register schema units)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS keys (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    register_id          INTEGER NOT NULL,
    name                 TEXT NOT NULL,
    schema               TEXT NOT NULL,              -- JSON Schema
    is_encrypted         INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    to_string_expr       TEXT,
    to_search_string_expr TEXT,
    to_export_expr       TEXT,
    created_at           TEXT NOT NULL,              -- RFC-3339, nanos, UTC
    updated_at           TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_keys_register_id ON keys(register_id);

-- ----------------------------------------------------------------
-- Records
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS records (
    id            TEXT PRIMARY KEY NOT NULL,        -- UUID v4
    key_id        INTEGER NOT NULL,                 -- FK -> keys(id)
    register_id   INTEGER NOT NULL,
    data          TEXT NOT NULL,                    -- JSON or packed ciphertext
    is_encrypted  INTEGER NOT NULL DEFAULT 0,
    search_string TEXT,
    signature     TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,

    FOREIGN KEY (key_id) REFERENCES keys(id)
);

CREATE INDEX IF NOT EXISTS idx_records_key_created
    ON records(key_id, created_at ASC);

-- ----------------------------------------------------------------
-- Afterhandlers (sync log of record mutations)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS afterhandlers (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    key_id     INTEGER NOT NULL,
    record_id  TEXT,                                -- NULL for key-level notes
    operation  TEXT NOT NULL,                       -- create|update|delete|reindex
    is_synced  INTEGER NOT NULL DEFAULT 0,
    sync_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_afterhandlers_key_id ON afterhandlers(key_id, id DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
