//! Syncable record kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The five kinds of rows that replicate to the remote container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordKind {
    /// Hierarchical task/note/folder item.
    Item,
    /// Label.
    Tag,
    /// Item-to-tag association.
    ItemTag,
    /// Timed work session attached to an item.
    TimeEntry,
    /// Saved search query.
    SavedSearch,
}

impl RecordKind {
    /// All kinds, in push dependency order (parents first).
    pub const ALL: [RecordKind; 5] = [
        RecordKind::Tag,
        RecordKind::Item,
        RecordKind::SavedSearch,
        RecordKind::ItemTag,
        RecordKind::TimeEntry,
    ];

    /// Local SQL table name.
    pub fn table_name(&self) -> &'static str {
        match self {
            RecordKind::Item => "items",
            RecordKind::Tag => "tags",
            RecordKind::ItemTag => "item_tags",
            RecordKind::TimeEntry => "time_entries",
            RecordKind::SavedSearch => "saved_searches",
        }
    }

    /// Wire record type name.
    pub fn record_type(&self) -> &'static str {
        match self {
            RecordKind::Item => "Item",
            RecordKind::Tag => "Tag",
            RecordKind::ItemTag => "ItemTag",
            RecordKind::TimeEntry => "TimeEntry",
            RecordKind::SavedSearch => "SavedSearch",
        }
    }

    /// Looks up a kind from its wire record type name.
    pub fn from_record_type(record_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.record_type() == record_type)
    }

    /// Position in the push dependency order. Lower ranks are submitted first.
    pub fn dependency_rank(&self) -> usize {
        Self::ALL
            .iter()
            .position(|kind| kind == self)
            .unwrap_or(Self::ALL.len())
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.record_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_lookup() {
        for kind in RecordKind::ALL {
            assert_eq!(RecordKind::from_record_type(kind.record_type()), Some(kind));
        }
        assert_eq!(RecordKind::from_record_type("Smart Folder"), None);
    }

    #[test]
    fn parents_rank_before_dependents() {
        assert!(RecordKind::Item.dependency_rank() < RecordKind::ItemTag.dependency_rank());
        assert!(RecordKind::Tag.dependency_rank() < RecordKind::ItemTag.dependency_rank());
        assert!(RecordKind::Item.dependency_rank() < RecordKind::TimeEntry.dependency_rank());
    }
}
