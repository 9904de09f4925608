//! Local row model for the syncable tables.
//!
//! Every syncable row carries the same bookkeeping ([`SyncMeta`]) next to
//! its domain fields. The version tag and system blob are opaque: they are
//! only ever copied from a confirmed remote response, never built locally.

use crate::kind::RecordKind;

/// Replication bookkeeping shared by all syncable rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMeta {
    /// Unix seconds of the last user-visible mutation.
    pub modified_at: i64,
    /// Unix seconds of the logical delete, if tombstoned.
    pub deleted_at: Option<i64>,
    /// True while local state differs from the last confirmed remote state.
    pub needs_push: bool,
    /// Stable external record name, assigned once at creation.
    pub remote_name: String,
    /// Remote version this row was last reconciled against.
    pub remote_version_tag: Option<String>,
    /// Opaque remote bookkeeping, replayed verbatim on update.
    pub remote_system_blob: Option<Vec<u8>>,
}

impl SyncMeta {
    /// Metadata for a row created locally and not yet pushed.
    pub fn new_local(remote_name: impl Into<String>, now: i64) -> Self {
        Self {
            modified_at: now,
            deleted_at: None,
            needs_push: true,
            remote_name: remote_name.into(),
            remote_version_tag: None,
            remote_system_blob: None,
        }
    }

    /// Returns true if the row is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Timestamp used for last-write-wins comparison.
    ///
    /// A local delete counts as a write at `deleted_at`.
    pub fn effective_modified_at(&self) -> i64 {
        match self.deleted_at {
            Some(deleted_at) => self.modified_at.max(deleted_at),
            None => self.modified_at,
        }
    }
}

/// Hierarchical task, note, folder, project or template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Row id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Task, Note, Folder, Template, Project, Heading or Link.
    pub item_type: String,
    /// Free-form notes body.
    pub notes: Option<String>,
    /// Parent item, or `None` at the root.
    pub parent_id: Option<String>,
    /// Position among siblings.
    pub sort_order: i64,
    /// Creation time.
    pub created_at: i64,
    /// Completion time for finished tasks.
    pub completed_at: Option<i64>,
    /// Due date.
    pub due_date: Option<i64>,
    /// Earliest time the item may be started.
    pub earliest_start_time: Option<i64>,
    /// Sync bookkeeping.
    pub meta: SyncMeta,
}

/// A label that can be attached to items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Row id.
    pub id: String,
    /// Tag name.
    pub name: String,
    /// Display color, e.g. `#ff8800`.
    pub color: Option<String>,
    /// Creation time.
    pub created_at: i64,
    /// Sync bookkeeping.
    pub meta: SyncMeta,
}

/// Association between an item and a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemTag {
    /// Row id, always `"{item_id}:{tag_id}"`.
    pub id: String,
    /// Tagged item.
    pub item_id: String,
    /// Applied tag.
    pub tag_id: String,
    /// Creation time.
    pub created_at: i64,
    /// Sync bookkeeping.
    pub meta: SyncMeta,
}

impl ItemTag {
    /// Deterministic id for an item/tag pair.
    ///
    /// Two devices tagging the same pair produce the same remote record.
    pub fn pair_id(item_id: &str, tag_id: &str) -> String {
        format!("{item_id}:{tag_id}")
    }
}

/// A timed work session on an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeEntry {
    /// Row id.
    pub id: String,
    /// Item the time was spent on.
    pub item_id: String,
    /// Session start.
    pub started_at: i64,
    /// Session end, `None` while running.
    pub ended_at: Option<i64>,
    /// Creation time.
    pub created_at: i64,
    /// Sync bookkeeping.
    pub meta: SyncMeta,
}

impl TimeEntry {
    /// Elapsed seconds, or `None` while the session is running.
    pub fn duration_secs(&self) -> Option<i64> {
        self.ended_at.map(|end| (end - self.started_at).max(0))
    }
}

/// A stored search query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSearch {
    /// Row id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Query text.
    pub query: String,
    /// Position in the sidebar.
    pub sort_order: i64,
    /// Creation time.
    pub created_at: i64,
    /// Sync bookkeeping.
    pub meta: SyncMeta,
}

/// A row of any syncable kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    /// Item row.
    Item(Item),
    /// Tag row.
    Tag(Tag),
    /// Item-tag association row.
    ItemTag(ItemTag),
    /// Time entry row.
    TimeEntry(TimeEntry),
    /// Saved search row.
    SavedSearch(SavedSearch),
}

impl Row {
    /// The kind of this row.
    pub fn kind(&self) -> RecordKind {
        match self {
            Row::Item(_) => RecordKind::Item,
            Row::Tag(_) => RecordKind::Tag,
            Row::ItemTag(_) => RecordKind::ItemTag,
            Row::TimeEntry(_) => RecordKind::TimeEntry,
            Row::SavedSearch(_) => RecordKind::SavedSearch,
        }
    }

    /// Row id.
    pub fn id(&self) -> &str {
        match self {
            Row::Item(row) => &row.id,
            Row::Tag(row) => &row.id,
            Row::ItemTag(row) => &row.id,
            Row::TimeEntry(row) => &row.id,
            Row::SavedSearch(row) => &row.id,
        }
    }

    /// Sync bookkeeping.
    pub fn meta(&self) -> &SyncMeta {
        match self {
            Row::Item(row) => &row.meta,
            Row::Tag(row) => &row.meta,
            Row::ItemTag(row) => &row.meta,
            Row::TimeEntry(row) => &row.meta,
            Row::SavedSearch(row) => &row.meta,
        }
    }

    /// Mutable sync bookkeeping.
    pub fn meta_mut(&mut self) -> &mut SyncMeta {
        match self {
            Row::Item(row) => &mut row.meta,
            Row::Tag(row) => &mut row.meta,
            Row::ItemTag(row) => &mut row.meta,
            Row::TimeEntry(row) => &mut row.meta,
            Row::SavedSearch(row) => &mut row.meta,
        }
    }

    /// Foreign keys held by this row, as `(kind, id)` pairs.
    pub fn references(&self) -> Vec<(RecordKind, &str)> {
        match self {
            Row::Item(row) => row
                .parent_id
                .as_deref()
                .map(|parent| vec![(RecordKind::Item, parent)])
                .unwrap_or_default(),
            Row::ItemTag(row) => vec![
                (RecordKind::Item, row.item_id.as_str()),
                (RecordKind::Tag, row.tag_id.as_str()),
            ],
            Row::TimeEntry(row) => vec![(RecordKind::Item, row.item_id.as_str())],
            Row::Tag(_) | Row::SavedSearch(_) => Vec::new(),
        }
    }
}

impl From<Item> for Row {
    fn from(row: Item) -> Self {
        Row::Item(row)
    }
}

impl From<Tag> for Row {
    fn from(row: Tag) -> Self {
        Row::Tag(row)
    }
}

impl From<ItemTag> for Row {
    fn from(row: ItemTag) -> Self {
        Row::ItemTag(row)
    }
}

impl From<TimeEntry> for Row {
    fn from(row: TimeEntry) -> Self {
        Row::TimeEntry(row)
    }
}

impl From<SavedSearch> for Row {
    fn from(row: SavedSearch) -> Self {
        Row::SavedSearch(row)
    }
}
