//! Push phase: submit pending local rows.

use crate::error::SyncResult;
use crate::remote::RemoteContainer;
use crate::resolver::{self, Resolution};
use crate::state::CycleReport;
use gtdsync_records::{
    from_remote, plan_push, to_remote, ItemError, ItemOutcome, RecordKind, RecordRef,
    RemoteRecord, Row, StoredRefs,
};
use gtdsync_store::{reconcile, table, LocalStore, StoreResult};
use rusqlite::Connection;
use std::collections::HashMap;
use tracing::{debug, info, warn};

enum Submission {
    Upsert(Row),
    Delete(Row),
}

impl Submission {
    fn row(&self) -> &Row {
        match self {
            Submission::Upsert(row) | Submission::Delete(row) => row,
        }
    }
}

/// Pushes every pending row in dependency order, in chunks of at most
/// `batch_limit` records.
///
/// Each chunk's outcomes are applied in one transaction before the next
/// chunk is submitted, so parents are acknowledged before their children.
pub(crate) async fn push<R>(
    store: &LocalStore,
    remote: &R,
    batch_limit: usize,
    report: &mut CycleReport,
) -> SyncResult<()>
where
    R: RemoteContainer + ?Sized,
{
    let (pending, stored) = store.read(|conn| {
        let mut pending = Vec::new();
        for kind in RecordKind::ALL {
            pending.extend(table::pending(conn, kind)?);
        }
        let stored = stored_refs(conn, &pending)?;
        Ok((pending, stored))
    })?;
    let plan = plan_push(pending, &stored);

    for (row, error) in &plan.rejected {
        warn!(kind = %row.kind(), id = row.id(), %error, "row cannot be pushed");
    }
    report.rejected += plan.rejected.len();

    if plan.is_empty() {
        debug!("nothing to push");
        return Ok(());
    }

    let submissions: Vec<Submission> = plan
        .upserts
        .into_iter()
        .map(Submission::Upsert)
        .chain(plan.deletes.into_iter().map(Submission::Delete))
        .collect();
    let batch_limit = batch_limit.max(1);
    let chunks = submissions.len().div_ceil(batch_limit);

    for (index, chunk) in submissions.chunks(batch_limit).enumerate() {
        let mut upserts: Vec<RemoteRecord> = Vec::new();
        let mut deletes: Vec<RecordRef> = Vec::new();
        let mut snapshots: HashMap<&str, &Row> = HashMap::with_capacity(chunk.len());

        for submission in chunk {
            let row = submission.row();
            let meta = row.meta();
            snapshots.insert(meta.remote_name.as_str(), row);
            match submission {
                Submission::Upsert(row) => upserts.push(to_remote(row)),
                Submission::Delete(row) => deletes.push(RecordRef::new(
                    row.kind(),
                    meta.remote_name.clone(),
                    meta.deleted_at,
                )),
            }
        }

        debug!(
            chunk = index + 1,
            chunks,
            upserts = upserts.len(),
            deletes = deletes.len(),
            "submitting changes"
        );
        let outcomes = remote.submit_changes(upserts, deletes).await?;

        store.write(|tx| {
            for outcome in &outcomes {
                let Some(snapshot) = snapshots.get(outcome.record_name()) else {
                    warn!(record_name = outcome.record_name(), "outcome for unsubmitted record");
                    continue;
                };
                apply_outcome(tx, snapshot, outcome, report)?;
            }
            Ok(())
        })?;
    }

    info!(
        pushed = report.pushed,
        deleted = report.deleted,
        rejected = report.rejected,
        "push complete"
    );
    Ok(())
}

/// Collects the stored rows that pending rows reference, with the stored
/// parent chain above every referenced item.
fn stored_refs(conn: &Connection, pending: &[Row]) -> StoreResult<StoredRefs> {
    let mut stored = StoredRefs::new();
    let mut items: Vec<String> = Vec::new();
    for row in pending {
        for (kind, id) in row.references() {
            if kind == RecordKind::Item {
                items.push(id.to_string());
            } else if !stored.contains(kind, id) && table::exists(conn, kind, id)? {
                stored.insert(kind, id);
            }
        }
    }

    while let Some(id) = items.pop() {
        if stored.knows_parent(&id) {
            continue;
        }
        if let Some(Row::Item(item)) = table::get(conn, RecordKind::Item, &id)? {
            if let Some(parent) = &item.parent_id {
                items.push(parent.clone());
            }
            stored.insert_item(item.id, item.parent_id);
        }
    }
    Ok(stored)
}

fn apply_outcome(
    conn: &Connection,
    snapshot: &Row,
    outcome: &ItemOutcome,
    report: &mut CycleReport,
) -> StoreResult<()> {
    match outcome {
        ItemOutcome::Saved(record) => {
            reconcile::mark_pushed(
                conn,
                snapshot,
                record.version_tag.as_deref(),
                record.system_blob.as_deref(),
            )?;
            report.pushed += 1;
        }
        ItemOutcome::Deleted { .. } => {
            reconcile::mark_delete_pushed(conn, snapshot)?;
            report.deleted += 1;
        }
        ItemOutcome::Rejected { record_name, error } => match error {
            ItemError::UnknownItem if snapshot.meta().is_deleted() => {
                // Already gone remotely.
                reconcile::mark_delete_pushed(conn, snapshot)?;
                report.deleted += 1;
            }
            ItemError::UnknownItem => {
                debug!(record_name, "record unknown remotely, recreating");
                reconcile::clear_remote_version(conn, snapshot.kind(), snapshot.id())?;
                report.requeued += 1;
            }
            ItemError::Conflict {
                server_record: Some(server),
            } => resolve_conflict(conn, snapshot, server, report)?,
            ItemError::Conflict {
                server_record: None,
            } => {
                debug!(record_name, "conflict without server record, left for pull");
                report.rejected += 1;
            }
            ItemError::Invalid(message) => {
                warn!(record_name, %message, "record refused by remote");
                report.rejected += 1;
            }
        },
    }
    Ok(())
}

fn resolve_conflict(
    conn: &Connection,
    snapshot: &Row,
    server: &RemoteRecord,
    report: &mut CycleReport,
) -> StoreResult<()> {
    let row = match from_remote(server, snapshot.kind()) {
        Ok(row) => row,
        Err(error) => {
            warn!(record_name = %server.record_name, %error, "skipping unusable server record");
            report.skipped += 1;
            return Ok(());
        }
    };
    match resolver::apply_record(conn, &row)? {
        Resolution::KeepLocal => report.kept_local += 1,
        Resolution::AcceptRemote | Resolution::Insert => report.accepted_remote += 1,
        Resolution::Unchanged => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gtdsync_store::NewItem;

    fn pending(store: &LocalStore) -> Vec<Row> {
        RecordKind::ALL
            .into_iter()
            .flat_map(|kind| store.pending(kind).unwrap())
            .collect()
    }

    #[test]
    fn stored_refs_walks_the_stored_parent_chain() {
        let store = LocalStore::open_in_memory().unwrap();
        let top = store.create_item(NewItem::of_type("Project", "Top")).unwrap();
        let middle = store.create_item(NewItem::task("Middle").under(&top.id)).unwrap();
        let leaf = store.create_item(NewItem::task("Leaf").under(&middle.id)).unwrap();
        let tag = store.create_tag("home", None).unwrap();
        store.tag_item(&leaf.id, &tag.id).unwrap();

        let rows = pending(&store);
        let stored = store.read(|conn| stored_refs(conn, &rows)).unwrap();
        assert!(stored.contains(RecordKind::Tag, &tag.id));
        for id in [&top.id, &middle.id, &leaf.id] {
            assert!(stored.knows_parent(id), "missing {id}");
        }
        assert!(!stored.contains(RecordKind::Tag, "missing"));
    }

    #[test]
    fn stored_refs_surfaces_database_errors() {
        let store = LocalStore::open_in_memory().unwrap();
        let item = store.create_item(NewItem::task("Tagged")).unwrap();
        let tag = store.create_tag("home", None).unwrap();
        store.tag_item(&item.id, &tag.id).unwrap();
        let rows = pending(&store);

        store
            .write(|tx| {
                tx.execute_batch("DROP TABLE tags")?;
                Ok(())
            })
            .unwrap();
        assert!(store.read(|conn| stored_refs(conn, &rows)).is_err());
    }
}
