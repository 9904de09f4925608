//! SQLite schema.
//!
//! Every syncable table carries the same six sync columns. There are no
//! foreign key constraints: replicated rows may arrive before their parents,
//! and tombstoned parents outlive purged children.

use crate::error::StoreResult;
use rusqlite::Connection;

/// Schema version stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    item_type TEXT NOT NULL DEFAULT 'Task',
    notes TEXT,
    parent_id TEXT,
    sort_order INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    completed_at INTEGER,
    due_date INTEGER,
    earliest_start_time INTEGER,
    modified_at INTEGER NOT NULL,
    deleted_at INTEGER,
    needs_push INTEGER NOT NULL DEFAULT 1,
    remote_name TEXT NOT NULL UNIQUE,
    remote_version_tag TEXT,
    remote_system_blob BLOB
);
CREATE INDEX IF NOT EXISTS idx_items_parent ON items(parent_id);
CREATE INDEX IF NOT EXISTS idx_items_needs_push ON items(needs_push);

CREATE TABLE IF NOT EXISTS tags (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    color TEXT,
    created_at INTEGER NOT NULL,
    modified_at INTEGER NOT NULL,
    deleted_at INTEGER,
    needs_push INTEGER NOT NULL DEFAULT 1,
    remote_name TEXT NOT NULL UNIQUE,
    remote_version_tag TEXT,
    remote_system_blob BLOB
);
CREATE INDEX IF NOT EXISTS idx_tags_needs_push ON tags(needs_push);

CREATE TABLE IF NOT EXISTS item_tags (
    id TEXT PRIMARY KEY,
    item_id TEXT NOT NULL,
    tag_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    modified_at INTEGER NOT NULL,
    deleted_at INTEGER,
    needs_push INTEGER NOT NULL DEFAULT 1,
    remote_name TEXT NOT NULL UNIQUE,
    remote_version_tag TEXT,
    remote_system_blob BLOB
);
CREATE INDEX IF NOT EXISTS idx_item_tags_item ON item_tags(item_id);
CREATE INDEX IF NOT EXISTS idx_item_tags_tag ON item_tags(tag_id);
CREATE INDEX IF NOT EXISTS idx_item_tags_needs_push ON item_tags(needs_push);

CREATE TABLE IF NOT EXISTS time_entries (
    id TEXT PRIMARY KEY,
    item_id TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    ended_at INTEGER,
    created_at INTEGER NOT NULL,
    modified_at INTEGER NOT NULL,
    deleted_at INTEGER,
    needs_push INTEGER NOT NULL DEFAULT 1,
    remote_name TEXT NOT NULL UNIQUE,
    remote_version_tag TEXT,
    remote_system_blob BLOB
);
CREATE INDEX IF NOT EXISTS idx_time_entries_item ON time_entries(item_id);
CREATE INDEX IF NOT EXISTS idx_time_entries_needs_push ON time_entries(needs_push);

CREATE TABLE IF NOT EXISTS saved_searches (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    query TEXT NOT NULL,
    sort_order INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    modified_at INTEGER NOT NULL,
    deleted_at INTEGER,
    needs_push INTEGER NOT NULL DEFAULT 1,
    remote_name TEXT NOT NULL UNIQUE,
    remote_version_tag TEXT,
    remote_system_blob BLOB
);
CREATE INDEX IF NOT EXISTS idx_saved_searches_needs_push ON saved_searches(needs_push);

-- Never replicated.
CREATE TABLE IF NOT EXISTS sync_metadata (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    cursor BLOB,
    device_id TEXT NOT NULL,
    last_sync_at INTEGER
);
"#;

/// Creates all tables and indexes if they do not exist.
pub fn init(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(SCHEMA)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap();
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
