//! SQLite schema for translation memories, entries and build locks.

use rusqlite::Connection;

pub(crate) const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS translation_memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    source_lang TEXT NOT NULL,
    target_lang TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'indexing', 'ready', 'error')),
    entry_count INTEGER NOT NULL DEFAULT 0,
    index_version INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    revision INTEGER NOT NULL DEFAULT 0,
    indexed_revision INTEGER,
    created_at INTEGER NOT NULL,
    indexed_at INTEGER
);

CREATE TABLE IF NOT EXISTS tm_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tm_id INTEGER NOT NULL REFERENCES translation_memories(id) ON DELETE CASCADE,
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    string_id TEXT,
    confirmed INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tm_entries_tm ON tm_entries(tm_id, id);

CREATE TABLE IF NOT EXISTS build_locks (
    tm_id INTEGER PRIMARY KEY REFERENCES translation_memories(id) ON DELETE CASCADE,
    holder TEXT NOT NULL,
    acquired_at INTEGER NOT NULL
);
"#;

/// Idempotent schema application.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_SCHEMA)
}
