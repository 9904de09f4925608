//! Reconciliation primitives.
//!
//! These are the only writes that touch `remote_version_tag`,
//! `remote_system_blob` or clear `needs_push`. The sync engine calls them
//! inside its per-batch transactions; nothing else should.

use crate::error::StoreResult;
use crate::table;
use gtdsync_records::{RecordKind, Row};
use rusqlite::{params, Connection};
use tracing::debug;

/// Writes a row received from the remote side, replacing any local row.
///
/// Used when the remote version wins or the row is new locally.
pub fn put_remote_row(conn: &Connection, row: &Row) -> StoreResult<()> {
    table::upsert(conn, row)
}

/// Keeps local fields but adopts the remote version, forcing a fresh push.
pub fn adopt_remote_version(
    conn: &Connection,
    kind: RecordKind,
    id: &str,
    version_tag: Option<&str>,
    system_blob: Option<&[u8]>,
) -> StoreResult<()> {
    let sql = format!(
        "UPDATE {} SET remote_version_tag = ?1, remote_system_blob = ?2, needs_push = 1
         WHERE id = ?3",
        kind.table_name()
    );
    conn.execute(&sql, params![version_tag, system_blob, id])?;
    Ok(())
}

/// Returns true if `current` still holds the local state captured in
/// `snapshot`. Remote bookkeeping and the push flag are ignored; every
/// domain field plus `modified_at` and `deleted_at` must match, so an edit
/// made within the same second as the snapshot still counts as a change.
fn unchanged_since(current: &Row, snapshot: &Row) -> bool {
    let mut current = current.clone();
    let mut snapshot = snapshot.clone();
    for row in [&mut current, &mut snapshot] {
        let meta = row.meta_mut();
        meta.needs_push = false;
        meta.remote_version_tag = None;
        meta.remote_system_blob = None;
    }
    current == snapshot
}

/// Records a confirmed upsert.
///
/// `snapshot` is the row as it was when submitted. The new version is always
/// stored; `needs_push` is cleared only if the row still matches the
/// snapshot. Returns true if it was cleared.
pub fn mark_pushed(
    conn: &Connection,
    snapshot: &Row,
    version_tag: Option<&str>,
    system_blob: Option<&[u8]>,
) -> StoreResult<bool> {
    let kind = snapshot.kind();
    let Some(current) = table::get(conn, kind, snapshot.id())? else {
        return Ok(false);
    };
    let confirmed = unchanged_since(&current, snapshot);

    let sql = format!(
        "UPDATE {} SET remote_version_tag = ?1, remote_system_blob = ?2, needs_push = ?3
         WHERE id = ?4",
        kind.table_name()
    );
    conn.execute(
        &sql,
        params![version_tag, system_blob, !confirmed, snapshot.id()],
    )?;
    if !confirmed {
        debug!(%kind, id = snapshot.id(), "row changed while push was in flight");
    }
    Ok(confirmed)
}

/// Records a confirmed remote delete of a local tombstone.
///
/// Clears `needs_push` only if the row is still the same tombstone.
pub fn mark_delete_pushed(conn: &Connection, snapshot: &Row) -> StoreResult<bool> {
    let kind = snapshot.kind();
    let Some(current) = table::get(conn, kind, snapshot.id())? else {
        return Ok(false);
    };
    let confirmed = unchanged_since(&current, snapshot);

    let sql = format!(
        "UPDATE {} SET remote_version_tag = NULL, remote_system_blob = NULL,
             needs_push = CASE WHEN ?1 THEN 0 ELSE needs_push END
         WHERE id = ?2",
        kind.table_name()
    );
    conn.execute(&sql, params![confirmed, snapshot.id()])?;
    Ok(confirmed)
}

/// Applies a remote deletion: the row becomes a confirmed tombstone.
pub fn mark_remote_deleted(
    conn: &Connection,
    kind: RecordKind,
    id: &str,
    deleted_at: i64,
) -> StoreResult<()> {
    let sql = format!(
        "UPDATE {} SET deleted_at = ?1, needs_push = 0,
             remote_version_tag = NULL, remote_system_blob = NULL
         WHERE id = ?2",
        kind.table_name()
    );
    conn.execute(&sql, params![deleted_at, id])?;
    Ok(())
}

/// Drops the stored remote version and flags the row for a fresh push.
///
/// Used after the remote side reports the record unknown, and when a local
/// edit outlives a remote deletion.
pub fn clear_remote_version(conn: &Connection, kind: RecordKind, id: &str) -> StoreResult<()> {
    let sql = format!(
        "UPDATE {} SET remote_version_tag = NULL, remote_system_blob = NULL, needs_push = 1
         WHERE id = ?1",
        kind.table_name()
    );
    conn.execute(&sql, [id])?;
    Ok(())
}

/// Deletes every confirmed row ahead of a full fetch-and-replace.
///
/// Rows still awaiting push are kept so unsent local work survives; the
/// refetched records are reconciled against them as usual.
pub fn wipe_synced_rows(conn: &Connection) -> StoreResult<usize> {
    let mut removed = 0;
    for kind in RecordKind::ALL {
        let sql = format!("DELETE FROM {} WHERE needs_push = 0", kind.table_name());
        removed += conn.execute(&sql, [])?;
    }
    Ok(removed)
}

/// Forgets every remote version and flags all live rows for push.
///
/// Used after the remote container was recreated empty, so local data is
/// uploaded again instead of being lost. Tombstones are left confirmed;
/// there is nothing left on the remote side for them to delete.
pub fn requeue_all(conn: &Connection) -> StoreResult<usize> {
    let mut requeued = 0;
    for kind in RecordKind::ALL {
        let sql = format!(
            "UPDATE {} SET remote_version_tag = NULL, remote_system_blob = NULL,
                 needs_push = CASE WHEN deleted_at IS NULL THEN 1 ELSE 0 END",
            kind.table_name()
        );
        conn.execute(&sql, [])?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE needs_push = 1",
            kind.table_name()
        );
        let pending: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        requeued += pending as usize;
    }
    Ok(requeued)
}
