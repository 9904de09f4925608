//! Soft-Delete Service.
//!
//! Deletes are logical: rows get `deleted_at` and `needs_push` so the delete
//! replicates, and are physically removed later by [`SoftDeleteService::purge`].
//!
//! Membership queries are chunked so no statement binds more than
//! `chunk_size` parameters.

use crate::error::{StoreError, StoreResult};
use crate::store::LocalStore;
use crate::table;
use gtdsync_records::RecordKind;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

/// Default tombstone retention.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default number of bound parameters per membership query.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Rows physically removed by one purge, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Items removed.
    pub items: usize,
    /// Tags removed.
    pub tags: usize,
    /// Item-tag associations removed.
    pub item_tags: usize,
    /// Time entries removed.
    pub time_entries: usize,
    /// Saved searches removed.
    pub saved_searches: usize,
}

impl PurgeReport {
    /// Total rows removed.
    pub fn total(&self) -> usize {
        self.items + self.tags + self.item_tags + self.time_entries + self.saved_searches
    }
}

/// Cascading soft delete and tombstone purge.
#[derive(Debug, Clone)]
pub struct SoftDeleteService {
    retention: Duration,
    chunk_size: usize,
}

impl Default for SoftDeleteService {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftDeleteService {
    /// Creates a service with default retention and chunk size.
    pub fn new() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Sets how long tombstones are kept before purge.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Sets the parameter ceiling per membership query.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Tombstone retention.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Deletes an item, its descendants, and their associations and time entries.
    ///
    /// Returns the number of rows tombstoned. Deleting a tombstone is a no-op.
    pub fn delete_item(&self, store: &LocalStore, id: &str) -> StoreResult<usize> {
        let now = store.clock().now();
        let count = store.write(|tx| {
            let Some(root) = table::get(tx, RecordKind::Item, id)? else {
                return Err(StoreError::not_found(RecordKind::Item, id));
            };
            if root.meta().is_deleted() {
                return Ok(0);
            }

            let items = self.collect_subtree(tx, id)?;
            let mut count = self.tombstone(tx, "items", "id", &items, now)?;
            count += self.tombstone(tx, "item_tags", "item_id", &items, now)?;
            count += self.tombstone(tx, "time_entries", "item_id", &items, now)?;
            Ok(count)
        })?;
        info!(id, count, "deleted item");
        Ok(count)
    }

    /// Deletes a tag and its associations.
    pub fn delete_tag(&self, store: &LocalStore, id: &str) -> StoreResult<usize> {
        let now = store.clock().now();
        let ids = [id.to_string()];
        let count = store.write(|tx| {
            if !table::exists(tx, RecordKind::Tag, id)? {
                return Err(StoreError::not_found(RecordKind::Tag, id));
            }
            let count = self.tombstone(tx, "tags", "id", &ids, now)?;
            if count == 0 {
                return Ok(0);
            }
            Ok(count + self.tombstone(tx, "item_tags", "tag_id", &ids, now)?)
        })?;
        info!(id, count, "deleted tag");
        Ok(count)
    }

    /// Removes a tag from an item.
    pub fn untag_item(&self, store: &LocalStore, item_id: &str, tag_id: &str) -> StoreResult<usize> {
        let id = gtdsync_records::ItemTag::pair_id(item_id, tag_id);
        self.delete_single(store, RecordKind::ItemTag, &id)
    }

    /// Deletes a time entry.
    pub fn delete_time_entry(&self, store: &LocalStore, id: &str) -> StoreResult<usize> {
        self.delete_single(store, RecordKind::TimeEntry, id)
    }

    /// Deletes a saved search.
    pub fn delete_saved_search(&self, store: &LocalStore, id: &str) -> StoreResult<usize> {
        self.delete_single(store, RecordKind::SavedSearch, id)
    }

    fn delete_single(&self, store: &LocalStore, kind: RecordKind, id: &str) -> StoreResult<usize> {
        let now = store.clock().now();
        let ids = [id.to_string()];
        store.write(|tx| {
            if !table::exists(tx, kind, id)? {
                return Err(StoreError::not_found(kind, id));
            }
            self.tombstone(tx, kind.table_name(), "id", &ids, now)
        })
    }

    /// Collects `root` and all live descendants, breadth first.
    fn collect_subtree(&self, conn: &Connection, root: &str) -> StoreResult<Vec<String>> {
        let mut seen: HashSet<String> = HashSet::from([root.to_string()]);
        let mut collected = vec![root.to_string()];
        let mut frontier = vec![root.to_string()];

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for chunk in frontier.chunks(self.chunk_size) {
                let sql = format!(
                    "SELECT id FROM items WHERE deleted_at IS NULL AND parent_id IN ({})",
                    placeholders(chunk.len(), 1)
                );
                let mut stmt = conn.prepare(&sql)?;
                let children = stmt
                    .query_map(params_from_iter(chunk), |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                for child in children {
                    if seen.insert(child.clone()) {
                        collected.push(child.clone());
                        next.push(child);
                    }
                }
            }
            frontier = next;
        }
        Ok(collected)
    }

    /// Marks live rows whose `column` is in `ids` as deleted at `now`.
    fn tombstone(
        &self,
        conn: &Connection,
        table: &str,
        column: &str,
        ids: &[String],
        now: i64,
    ) -> StoreResult<usize> {
        let mut count = 0;
        // One parameter is taken by the timestamp.
        let per_chunk = self.chunk_size.saturating_sub(1).max(1);
        for chunk in ids.chunks(per_chunk) {
            let sql = format!(
                "UPDATE {table} SET deleted_at = ?1, needs_push = 1
                 WHERE deleted_at IS NULL AND {column} IN ({})",
                placeholders(chunk.len(), 2)
            );
            let mut values = Vec::with_capacity(chunk.len() + 1);
            values.push(Value::Integer(now));
            values.extend(chunk.iter().map(|id| Value::Text(id.clone())));
            count += conn.execute(&sql, params_from_iter(values))?;
        }
        Ok(count)
    }

    /// Physically removes tombstones older than the retention window.
    ///
    /// Only rows whose delete has been confirmed remotely (`needs_push = 0`)
    /// are eligible. Tags with live associations and items that still have
    /// children, live associations or live time entries are kept for a later
    /// pass. Associations and leaf rows go before their parents.
    pub fn purge(&self, store: &LocalStore, now: i64) -> StoreResult<PurgeReport> {
        let cutoff = now - self.retention.as_secs() as i64;
        let report = store.write(|tx| {
            let eligible = "deleted_at IS NOT NULL AND deleted_at < ?1 AND needs_push = 0";
            let mut report = PurgeReport {
                item_tags: tx.execute(&format!("DELETE FROM item_tags WHERE {eligible}"), [cutoff])?,
                time_entries: tx
                    .execute(&format!("DELETE FROM time_entries WHERE {eligible}"), [cutoff])?,
                saved_searches: tx
                    .execute(&format!("DELETE FROM saved_searches WHERE {eligible}"), [cutoff])?,
                ..PurgeReport::default()
            };

            report.tags = tx.execute(
                &format!(
                    "DELETE FROM tags WHERE {eligible} AND NOT EXISTS (
                         SELECT 1 FROM item_tags l
                         WHERE l.tag_id = tags.id AND l.deleted_at IS NULL)"
                ),
                [cutoff],
            )?;

            // Leaves first; each pass may expose new leaves.
            let items_sql = format!(
                "DELETE FROM items WHERE {eligible}
                 AND NOT EXISTS (SELECT 1 FROM items c WHERE c.parent_id = items.id)
                 AND NOT EXISTS (SELECT 1 FROM item_tags l
                                 WHERE l.item_id = items.id AND l.deleted_at IS NULL)
                 AND NOT EXISTS (SELECT 1 FROM time_entries e
                                 WHERE e.item_id = items.id AND e.deleted_at IS NULL)"
            );
            loop {
                let removed = tx.execute(&items_sql, [cutoff])?;
                if removed == 0 {
                    break;
                }
                report.items += removed;
            }
            Ok(report)
        })?;

        if report.total() > 0 {
            info!(
                items = report.items,
                tags = report.tags,
                item_tags = report.item_tags,
                time_entries = report.time_entries,
                saved_searches = report.saved_searches,
                "purged tombstones"
            );
        } else {
            debug!("no tombstones eligible for purge");
        }
        Ok(report)
    }
}

fn placeholders(count: usize, first: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}
