//! Conflict resolution.
//!
//! Last write wins on `modified_at`. A local tombstone counts as a write at
//! its `deleted_at`. When local fields are kept, the row still adopts the
//! remote version so the next push is not rejected as stale.

use gtdsync_records::{RecordKind, Row};
use gtdsync_store::{reconcile, table, StoreResult};
use rusqlite::Connection;
use tracing::debug;

/// Decision for an incoming remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No local row: insert the remote one.
    Insert,
    /// Already reconciled at this version.
    Unchanged,
    /// Remote is newer: overwrite local fields and clear `needs_push`.
    AcceptRemote,
    /// Local is newer: keep fields, adopt the remote version, push again.
    KeepLocal,
}

/// Decision for an incoming remote deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionResolution {
    /// Nothing stored, or already a confirmed tombstone.
    Ignore,
    /// Our own pending delete was already applied remotely.
    ConfirmLocalDelete,
    /// Tombstone the local row.
    AcceptDelete,
    /// A newer local edit outlives the deletion and is pushed again.
    KeepLocal,
}

/// Chooses between a stored row and an incoming remote version of it.
///
/// On equal timestamps a row with unpushed changes keeps its fields and a
/// clean row accepts the remote state.
pub fn resolve(local: Option<&Row>, remote: &Row) -> Resolution {
    let Some(local) = local else {
        return Resolution::Insert;
    };
    let local_meta = local.meta();
    let remote_meta = remote.meta();

    if remote_meta.remote_version_tag.is_some()
        && local_meta.remote_version_tag == remote_meta.remote_version_tag
    {
        return Resolution::Unchanged;
    }

    let local_at = local_meta.effective_modified_at();
    let remote_at = remote_meta.modified_at;
    if remote_at > local_at || (remote_at == local_at && !local_meta.needs_push) {
        Resolution::AcceptRemote
    } else {
        Resolution::KeepLocal
    }
}

/// Chooses how to apply a remote deletion of a stored row.
///
/// A deletion that carries no timestamp is treated as the newest write.
pub fn resolve_deletion(local: Option<&Row>, deleted_at: Option<i64>) -> DeletionResolution {
    let Some(local) = local else {
        return DeletionResolution::Ignore;
    };
    let meta = local.meta();

    if meta.is_deleted() {
        return if meta.needs_push {
            DeletionResolution::ConfirmLocalDelete
        } else {
            DeletionResolution::Ignore
        };
    }
    if !meta.needs_push {
        return DeletionResolution::AcceptDelete;
    }
    match deleted_at {
        Some(at) if at <= meta.modified_at => DeletionResolution::KeepLocal,
        _ => DeletionResolution::AcceptDelete,
    }
}

/// Applies one incoming record and returns the decision taken.
pub fn apply_record(conn: &Connection, remote: &Row) -> StoreResult<Resolution> {
    let kind = remote.kind();
    let local = table::find_by_remote_name(conn, kind, &remote.meta().remote_name)?;
    let resolution = resolve(local.as_ref(), remote);

    match resolution {
        Resolution::Insert | Resolution::AcceptRemote => {
            reconcile::put_remote_row(conn, remote)?;
        }
        Resolution::Unchanged => {}
        Resolution::KeepLocal => {
            if let Some(local) = &local {
                let meta = remote.meta();
                reconcile::adopt_remote_version(
                    conn,
                    kind,
                    local.id(),
                    meta.remote_version_tag.as_deref(),
                    meta.remote_system_blob.as_deref(),
                )?;
            }
        }
    }
    debug!(%kind, record_name = %remote.meta().remote_name, ?resolution, "applied remote record");
    Ok(resolution)
}

/// Applies one incoming deletion to a row of a known kind.
pub fn apply_deletion(
    conn: &Connection,
    kind: RecordKind,
    record_name: &str,
    deleted_at: Option<i64>,
) -> StoreResult<DeletionResolution> {
    let local = table::find_by_remote_name(conn, kind, record_name)?;
    let resolution = resolve_deletion(local.as_ref(), deleted_at);

    if let Some(local) = &local {
        match resolution {
            DeletionResolution::Ignore => {}
            DeletionResolution::ConfirmLocalDelete => {
                reconcile::mark_delete_pushed(conn, local)?;
            }
            DeletionResolution::AcceptDelete => {
                let at = deleted_at.unwrap_or(local.meta().modified_at);
                reconcile::mark_remote_deleted(conn, kind, local.id(), at)?;
            }
            DeletionResolution::KeepLocal => {
                reconcile::clear_remote_version(conn, kind, local.id())?;
            }
        }
    }
    debug!(%kind, record_name, ?resolution, "applied remote deletion");
    Ok(resolution)
}

/// Applies a deletion with no kind hint by searching every table.
pub fn apply_deletion_any(
    conn: &Connection,
    record_name: &str,
    deleted_at: Option<i64>,
) -> StoreResult<Option<(RecordKind, DeletionResolution)>> {
    for kind in RecordKind::ALL {
        if table::find_by_remote_name(conn, kind, record_name)?.is_some() {
            let resolution = apply_deletion(conn, kind, record_name, deleted_at)?;
            return Ok(Some((kind, resolution)));
        }
    }
    Ok(None)
}
