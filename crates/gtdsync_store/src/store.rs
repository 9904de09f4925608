//! The local relational store.

use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};
use crate::{metadata, schema, table};
use gtdsync_records::{Item, ItemTag, RecordKind, Row, SavedSearch, SyncMeta, Tag, TimeEntry};
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

/// Fields for a new item.
#[derive(Debug, Clone, Default)]
pub struct NewItem {
    /// Display title.
    pub title: String,
    /// Item type, e.g. `Task` or `Folder`.
    pub item_type: String,
    /// Free-form notes.
    pub notes: Option<String>,
    /// Parent item.
    pub parent_id: Option<String>,
    /// Position among siblings.
    pub sort_order: i64,
    /// Due date.
    pub due_date: Option<i64>,
    /// Earliest start time.
    pub earliest_start_time: Option<i64>,
}

impl NewItem {
    /// A root-level task.
    pub fn task(title: impl Into<String>) -> Self {
        Self::of_type("Task", title)
    }

    /// A root-level item of the given type.
    pub fn of_type(item_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            item_type: item_type.into(),
            ..Self::default()
        }
    }

    /// Places the item under `parent_id`.
    pub fn under(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Sets the notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Sets the due date.
    pub fn due(mut self, due_date: i64) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

/// Row counts for one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindCounts {
    /// The kind counted.
    pub kind: RecordKind,
    /// Live rows.
    pub live: usize,
    /// Tombstoned rows.
    pub tombstones: usize,
    /// Rows awaiting push.
    pub pending: usize,
}

/// SQLite-backed store for the syncable tables and sync metadata.
///
/// One connection is shared behind a mutex; every write goes through
/// [`LocalStore::write`], which runs in a single transaction.
pub struct LocalStore {
    conn: Mutex<Connection>,
    clock: Clock,
    device_id: String,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

impl LocalStore {
    /// Opens or creates a store file.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn)
    }

    /// Creates an in-memory store.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        schema::init(&conn)?;
        let metadata = metadata::ensure(&conn)?;
        debug!(device_id = %metadata.device_id, "opened local store");
        Ok(Self {
            conn: Mutex::new(conn),
            clock: Clock::system(),
            device_id: metadata.device_id,
        })
    }

    /// Replaces the clock used to stamp local mutations.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// The clock used to stamp local mutations.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// This device's stable identifier.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Runs a read-only closure against the connection.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Runs a closure in one transaction.
    ///
    /// Commits if the closure returns `Ok`, rolls back otherwise.
    pub fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ---- queries ----

    /// Loads a row by id, including tombstones.
    pub fn get(&self, kind: RecordKind, id: &str) -> StoreResult<Option<Row>> {
        self.read(|conn| table::get(conn, kind, id))
    }

    /// Loads a row by remote record name.
    pub fn find_by_remote_name(
        &self,
        kind: RecordKind,
        remote_name: &str,
    ) -> StoreResult<Option<Row>> {
        self.read(|conn| table::find_by_remote_name(conn, kind, remote_name))
    }

    /// All rows of a kind, tombstones included.
    pub fn rows(&self, kind: RecordKind) -> StoreResult<Vec<Row>> {
        self.read(|conn| table::all(conn, kind))
    }

    /// Rows of a kind awaiting push.
    pub fn pending(&self, kind: RecordKind) -> StoreResult<Vec<Row>> {
        self.read(|conn| table::pending(conn, kind))
    }

    /// Live, tombstoned and pending counts for every kind.
    pub fn counts(&self) -> StoreResult<Vec<KindCounts>> {
        self.read(|conn| {
            RecordKind::ALL
                .into_iter()
                .map(|kind| {
                    let sql = format!(
                        "SELECT
                            COALESCE(SUM(deleted_at IS NULL), 0),
                            COALESCE(SUM(deleted_at IS NOT NULL), 0),
                            COALESCE(SUM(needs_push), 0)
                         FROM {}",
                        kind.table_name()
                    );
                    let (live, tombstones, pending): (i64, i64, i64) =
                        conn.query_row(&sql, [], |row| {
                            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                        })?;
                    Ok(KindCounts {
                        kind,
                        live: live as usize,
                        tombstones: tombstones as usize,
                        pending: pending as usize,
                    })
                })
                .collect()
        })
    }

    /// Reads the sync metadata row.
    pub fn metadata(&self) -> StoreResult<metadata::SyncMetadata> {
        self.read(metadata::load)
    }

    /// Forgets the change cursor, forcing a full resync.
    pub fn reset_cursor(&self) -> StoreResult<()> {
        self.write(|tx| metadata::clear_cursor(tx))
    }

    // ---- local mutations ----

    fn new_meta(&self, id: &str) -> SyncMeta {
        SyncMeta::new_local(id, self.clock.now())
    }

    fn insert(&self, row: Row) -> StoreResult<Row> {
        self.write(|tx| table::upsert(tx, &row))?;
        debug!(kind = %row.kind(), id = row.id(), "created row");
        Ok(row)
    }

    /// Creates an item.
    pub fn create_item(&self, new: NewItem) -> StoreResult<Item> {
        let id = Uuid::new_v4().to_string();
        let meta = self.new_meta(&id);
        let item = Item {
            created_at: meta.modified_at,
            id,
            title: new.title,
            item_type: new.item_type,
            notes: new.notes,
            parent_id: new.parent_id,
            sort_order: new.sort_order,
            completed_at: None,
            due_date: new.due_date,
            earliest_start_time: new.earliest_start_time,
            meta,
        };
        self.insert(item.clone().into())?;
        Ok(item)
    }

    /// Creates a tag.
    pub fn create_tag(&self, name: impl Into<String>, color: Option<&str>) -> StoreResult<Tag> {
        let id = Uuid::new_v4().to_string();
        let meta = self.new_meta(&id);
        let tag = Tag {
            created_at: meta.modified_at,
            id,
            name: name.into(),
            color: color.map(String::from),
            meta,
        };
        self.insert(tag.clone().into())?;
        Ok(tag)
    }

    /// Attaches a tag to an item.
    ///
    /// The association id is derived from the pair. A tombstoned association
    /// is revived; a live one is returned unchanged.
    pub fn tag_item(&self, item_id: &str, tag_id: &str) -> StoreResult<ItemTag> {
        let id = ItemTag::pair_id(item_id, tag_id);
        let now = self.clock.now();
        self.write(|tx| {
            for (kind, target) in [(RecordKind::Item, item_id), (RecordKind::Tag, tag_id)] {
                if !table::exists(tx, kind, target)? {
                    return Err(StoreError::not_found(kind, target));
                }
            }

            let link = match table::get(tx, RecordKind::ItemTag, &id)? {
                Some(Row::ItemTag(link)) if !link.meta.is_deleted() => return Ok(link),
                Some(Row::ItemTag(mut link)) => {
                    link.meta.deleted_at = None;
                    link.meta.modified_at = now;
                    link.meta.needs_push = true;
                    link
                }
                _ => ItemTag {
                    meta: SyncMeta::new_local(id.clone(), now),
                    id: id.clone(),
                    item_id: item_id.to_string(),
                    tag_id: tag_id.to_string(),
                    created_at: now,
                },
            };
            table::upsert(tx, &Row::ItemTag(link.clone()))?;
            Ok(link)
        })
    }

    /// Starts a time entry on an item.
    pub fn start_time_entry(&self, item_id: &str) -> StoreResult<TimeEntry> {
        if self.get(RecordKind::Item, item_id)?.is_none() {
            return Err(StoreError::not_found(RecordKind::Item, item_id));
        }
        let id = Uuid::new_v4().to_string();
        let meta = self.new_meta(&id);
        let entry = TimeEntry {
            started_at: meta.modified_at,
            created_at: meta.modified_at,
            id,
            item_id: item_id.to_string(),
            ended_at: None,
            meta,
        };
        self.insert(entry.clone().into())?;
        Ok(entry)
    }

    /// Stops a running time entry.
    pub fn stop_time_entry(&self, entry_id: &str) -> StoreResult<TimeEntry> {
        let Some(Row::TimeEntry(mut entry)) = self.get(RecordKind::TimeEntry, entry_id)? else {
            return Err(StoreError::not_found(RecordKind::TimeEntry, entry_id));
        };
        if entry.ended_at.is_some() {
            return Err(StoreError::InvalidOperation(format!(
                "time entry {entry_id} is already stopped"
            )));
        }
        entry.ended_at = Some(self.clock.now().max(entry.started_at));
        match self.update_row(Row::TimeEntry(entry))? {
            Row::TimeEntry(entry) => Ok(entry),
            _ => Err(StoreError::not_found(RecordKind::TimeEntry, entry_id)),
        }
    }

    /// Creates a saved search at the end of the list.
    pub fn create_saved_search(
        &self,
        name: impl Into<String>,
        query: impl Into<String>,
    ) -> StoreResult<SavedSearch> {
        let next_order: i64 = self.read(|conn| {
            Ok(conn.query_row(
                "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM saved_searches
                 WHERE deleted_at IS NULL",
                [],
                |row| row.get(0),
            )?)
        })?;
        let id = Uuid::new_v4().to_string();
        let meta = self.new_meta(&id);
        let search = SavedSearch {
            created_at: meta.modified_at,
            id,
            name: name.into(),
            query: query.into(),
            sort_order: next_order,
            meta,
        };
        self.insert(search.clone().into())?;
        Ok(search)
    }

    /// Saves edited domain fields of an existing live row.
    ///
    /// The sync columns of `row` are ignored: the stored remote bookkeeping
    /// is kept, `modified_at` is stamped and the row is flagged for push.
    pub fn update_row(&self, mut row: Row) -> StoreResult<Row> {
        let now = self.clock.now();
        self.write(|tx| {
            let kind = row.kind();
            let Some(stored) = table::get(tx, kind, row.id())? else {
                return Err(StoreError::not_found(kind, row.id()));
            };
            if stored.meta().is_deleted() {
                return Err(StoreError::InvalidOperation(format!(
                    "{kind} {} is deleted",
                    row.id()
                )));
            }
            let meta = row.meta_mut();
            *meta = stored.meta().clone();
            // Never step backwards, or last-write-wins would discard the edit.
            meta.modified_at = now.max(meta.modified_at);
            meta.needs_push = true;
            table::upsert(tx, &row)?;
            Ok(row)
        })
    }
}
