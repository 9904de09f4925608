//! Pull phase: apply the remote change feed.

use crate::error::SyncResult;
use crate::remote::RemoteContainer;
use crate::resolver::{self, DeletionResolution, Resolution};
use crate::state::CycleReport;
use gtdsync_records::{from_remote_any, ChangePage};
use gtdsync_store::{metadata, reconcile, LocalStore, StoreResult};
use rusqlite::Connection;
use tracing::{debug, info, warn};

/// How much of the feed to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PullMode {
    /// Changes since the stored cursor.
    Incremental,
    /// The whole feed, replacing every confirmed local row.
    Full,
}

/// Pulls the change feed until it is exhausted.
///
/// Each page is applied in one transaction that saves the page's cursor
/// last, so an interrupted pull resumes after the last applied page.
/// `on_progress` receives 0-100 during a full pull.
pub(crate) async fn pull<R, P>(
    store: &LocalStore,
    remote: &R,
    mode: PullMode,
    report: &mut CycleReport,
    on_progress: P,
) -> SyncResult<()>
where
    R: RemoteContainer + ?Sized,
    P: Fn(u8),
{
    let mut cursor = match mode {
        PullMode::Incremental => store.read(metadata::cursor)?,
        PullMode::Full => {
            let removed = store.write(|tx| {
                metadata::clear_cursor(tx)?;
                reconcile::wipe_synced_rows(tx)
            })?;
            info!(removed, "cleared local rows for full resync");
            report.full_resync = true;
            on_progress(0);
            None
        }
    };

    let mut total: Option<u64> = None;
    let mut received: u64 = 0;
    let mut pages = 0usize;

    loop {
        let page = remote.fetch_changes(cursor.take()).await?;
        pages += 1;
        if total.is_none() {
            total = page.approximate_total;
        }
        received += (page.records.len() + page.deleted.len()) as u64;

        store.write(|tx| apply_page(tx, &page, report))?;
        debug!(
            page = pages,
            records = page.records.len(),
            deletions = page.deleted.len(),
            has_more = page.has_more,
            "applied remote page"
        );

        if mode == PullMode::Full {
            if let Some(total) = total.filter(|total| *total > 0) {
                let percent = (received.saturating_mul(100) / total).min(99);
                on_progress(percent as u8);
            }
        }

        if !page.has_more {
            break;
        }
        cursor = Some(page.next_cursor);
    }

    if mode == PullMode::Full {
        on_progress(100);
    }
    info!(
        pulled = report.pulled,
        remote_deletions = report.remote_deletions,
        pages,
        "pull complete"
    );
    Ok(())
}

fn apply_page(conn: &Connection, page: &ChangePage, report: &mut CycleReport) -> StoreResult<()> {
    for record in &page.records {
        let row = match from_remote_any(record) {
            Ok(row) => row,
            Err(error) => {
                warn!(record_name = %record.record_name, %error, "skipping remote record");
                report.skipped += 1;
                continue;
            }
        };
        match resolver::apply_record(conn, &row)? {
            Resolution::Insert => report.pulled += 1,
            Resolution::AcceptRemote => {
                report.pulled += 1;
                report.accepted_remote += 1;
            }
            Resolution::KeepLocal => report.kept_local += 1,
            Resolution::Unchanged => {}
        }
    }

    for deleted in &page.deleted {
        let resolution = match deleted.kind {
            Some(kind) => Some(resolver::apply_deletion(
                conn,
                kind,
                &deleted.record_name,
                deleted.deleted_at,
            )?),
            None => resolver::apply_deletion_any(conn, &deleted.record_name, deleted.deleted_at)?
                .map(|(_, resolution)| resolution),
        };
        match resolution {
            Some(DeletionResolution::AcceptDelete) => report.remote_deletions += 1,
            Some(DeletionResolution::KeepLocal) => report.kept_local += 1,
            Some(DeletionResolution::ConfirmLocalDelete | DeletionResolution::Ignore) | None => {}
        }
    }

    metadata::save_cursor(conn, &page.next_cursor)
}
