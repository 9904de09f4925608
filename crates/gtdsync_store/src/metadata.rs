//! Sync Metadata Store.
//!
//! One row holding the latest change cursor, this device's id and the time
//! of the last successful sync. None of it is ever replicated.
//!
//! The cursor is written by [`save_cursor`], which callers must run inside
//! the same transaction that applied the corresponding page, as its last
//! statement. A crash before commit then leaves both the page and the cursor
//! unapplied.

use crate::error::StoreResult;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

/// Contents of the sync metadata row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMetadata {
    /// Opaque cursor from the last applied page, `None` before the first sync.
    pub cursor: Option<Vec<u8>>,
    /// Stable identifier of this device.
    pub device_id: String,
    /// Unix seconds of the last successful cycle.
    pub last_sync_at: Option<i64>,
}

/// Creates the metadata row with a fresh device id if it does not exist.
pub fn ensure(conn: &Connection) -> StoreResult<SyncMetadata> {
    conn.execute(
        "INSERT OR IGNORE INTO sync_metadata (id, cursor, device_id, last_sync_at)
         VALUES (1, NULL, ?1, NULL)",
        [Uuid::new_v4().to_string()],
    )?;
    load(conn)
}

/// Reads the metadata row.
pub fn load(conn: &Connection) -> StoreResult<SyncMetadata> {
    let metadata = conn
        .query_row(
            "SELECT cursor, device_id, last_sync_at FROM sync_metadata WHERE id = 1",
            [],
            |row| {
                Ok(SyncMetadata {
                    cursor: row.get(0)?,
                    device_id: row.get(1)?,
                    last_sync_at: row.get(2)?,
                })
            },
        )
        .optional()?;
    match metadata {
        Some(metadata) => Ok(metadata),
        None => ensure(conn),
    }
}

/// Reads only the cursor.
pub fn cursor(conn: &Connection) -> StoreResult<Option<Vec<u8>>> {
    let cursor: Option<Option<Vec<u8>>> = conn
        .query_row("SELECT cursor FROM sync_metadata WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(cursor.flatten())
}

/// Stores the cursor of a fully applied page.
pub fn save_cursor(conn: &Connection, cursor: &[u8]) -> StoreResult<()> {
    conn.execute(
        "UPDATE sync_metadata SET cursor = ?1 WHERE id = 1",
        params![cursor],
    )?;
    Ok(())
}

/// Forgets the cursor so the next pull fetches everything.
pub fn clear_cursor(conn: &Connection) -> StoreResult<()> {
    conn.execute("UPDATE sync_metadata SET cursor = NULL WHERE id = 1", [])?;
    Ok(())
}

/// Records the time of a successful cycle.
pub fn set_last_sync_at(conn: &Connection, at: i64) -> StoreResult<()> {
    conn.execute(
        "UPDATE sync_metadata SET last_sync_at = ?1 WHERE id = 1",
        [at],
    )?;
    Ok(())
}
