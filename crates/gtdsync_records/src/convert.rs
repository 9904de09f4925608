//! Record Converter: translation between local rows and wire records.
//!
//! All functions here are pure. They perform no I/O and hold no state, so
//! they can be called from any thread.

use crate::error::{ConvertError, ConvertResult};
use crate::kind::RecordKind;
use crate::model::{Item, ItemTag, Row, SavedSearch, SyncMeta, Tag, TimeEntry};
use crate::record::{FieldValue, RemoteRecord};

/// Wire field names.
pub mod fields {
    /// Last modification time (all kinds).
    pub const MODIFIED_AT: &str = "modifiedAt";
    /// Creation time (all kinds).
    pub const CREATED_AT: &str = "createdAt";
    /// Item title.
    pub const TITLE: &str = "title";
    /// Item type.
    pub const ITEM_TYPE: &str = "itemType";
    /// Item notes.
    pub const NOTES: &str = "notes";
    /// Item parent reference.
    pub const PARENT_ID: &str = "parentId";
    /// Sort order (items, saved searches).
    pub const SORT_ORDER: &str = "sortOrder";
    /// Item completion time.
    pub const COMPLETED_AT: &str = "completedAt";
    /// Item due date.
    pub const DUE_DATE: &str = "dueDate";
    /// Item earliest start time.
    pub const EARLIEST_START_TIME: &str = "earliestStartTime";
    /// Name (tags, saved searches).
    pub const NAME: &str = "name";
    /// Tag color.
    pub const COLOR: &str = "color";
    /// Item reference (associations, time entries).
    pub const ITEM_ID: &str = "itemId";
    /// Tag reference (associations).
    pub const TAG_ID: &str = "tagId";
    /// Time entry start.
    pub const STARTED_AT: &str = "startedAt";
    /// Time entry end.
    pub const ENDED_AT: &str = "endedAt";
    /// Saved search query text.
    pub const QUERY: &str = "query";
}

use fields::*;

/// Packs a row into a new wire record, including the system blob if present.
pub fn to_remote(row: &Row) -> RemoteRecord {
    let meta = row.meta();
    let mut record = RemoteRecord::new(row.kind(), meta.remote_name.clone());
    write_fields(&mut record, row);
    record.version_tag = meta.remote_version_tag.clone();
    record.system_blob = meta.remote_system_blob.clone();
    record
}

/// Overwrites the domain fields of an existing wire record with `row`.
///
/// The record's version tag, system blob and any fields this converter
/// does not know about are left untouched, so the record can be resubmitted
/// against the version it was fetched at.
pub fn update_in_place(record: &mut RemoteRecord, row: &Row) {
    write_fields(record, row);
}

/// Unpacks a wire record into a row of the `expected` kind.
///
/// The returned row is marked as confirmed (`needs_push = false`) and
/// carries the record's version tag and system blob.
pub fn from_remote(record: &RemoteRecord, expected: RecordKind) -> ConvertResult<Row> {
    if record.record_type != expected.record_type() {
        return Err(ConvertError::KindMismatch {
            record_name: record.record_name.clone(),
            expected,
            found: record.record_type.clone(),
        });
    }

    let reader = FieldReader {
        record,
        kind: expected,
    };
    let meta = SyncMeta {
        modified_at: reader.required_int(MODIFIED_AT)?,
        deleted_at: None,
        needs_push: false,
        remote_name: record.record_name.clone(),
        remote_version_tag: record.version_tag.clone(),
        remote_system_blob: record.system_blob.clone(),
    };
    let id = record.record_name.clone();
    let created_at = reader.optional_int(CREATED_AT)?.unwrap_or(meta.modified_at);

    let row = match expected {
        RecordKind::Item => Row::Item(Item {
            id,
            title: reader.required_text(TITLE)?,
            item_type: reader.required_text(ITEM_TYPE)?,
            notes: reader.optional_text(NOTES)?,
            parent_id: reader.optional_ref(PARENT_ID)?,
            sort_order: reader.optional_int(SORT_ORDER)?.unwrap_or(0),
            created_at,
            completed_at: reader.optional_int(COMPLETED_AT)?,
            due_date: reader.optional_int(DUE_DATE)?,
            earliest_start_time: reader.optional_int(EARLIEST_START_TIME)?,
            meta,
        }),
        RecordKind::Tag => Row::Tag(Tag {
            id,
            name: reader.required_text(NAME)?,
            color: reader.optional_text(COLOR)?,
            created_at,
            meta,
        }),
        RecordKind::ItemTag => Row::ItemTag(ItemTag {
            id,
            item_id: reader.required_ref(ITEM_ID)?,
            tag_id: reader.required_ref(TAG_ID)?,
            created_at,
            meta,
        }),
        RecordKind::TimeEntry => Row::TimeEntry(TimeEntry {
            id,
            item_id: reader.required_ref(ITEM_ID)?,
            started_at: reader.required_int(STARTED_AT)?,
            ended_at: reader.optional_int(ENDED_AT)?,
            created_at,
            meta,
        }),
        RecordKind::SavedSearch => Row::SavedSearch(SavedSearch {
            id,
            name: reader.required_text(NAME)?,
            query: reader.required_text(QUERY)?,
            sort_order: reader.optional_int(SORT_ORDER)?.unwrap_or(0),
            created_at,
            meta,
        }),
    };
    Ok(row)
}

/// Unpacks a wire record using its declared record type.
pub fn from_remote_any(record: &RemoteRecord) -> ConvertResult<Row> {
    let kind = record
        .kind()
        .ok_or_else(|| ConvertError::UnknownRecordType {
            record_name: record.record_name.clone(),
            record_type: record.record_type.clone(),
        })?;
    from_remote(record, kind)
}

fn write_fields(record: &mut RemoteRecord, row: &Row) {
    match row {
        Row::Item(item) => {
            record.set_text(TITLE, Some(&item.title));
            record.set_text(ITEM_TYPE, Some(&item.item_type));
            record.set_text(NOTES, item.notes.as_deref());
            record.set_text(PARENT_ID, item.parent_id.as_deref());
            record.set_int(SORT_ORDER, Some(item.sort_order));
            record.set_int(CREATED_AT, Some(item.created_at));
            record.set_int(COMPLETED_AT, item.completed_at);
            record.set_int(DUE_DATE, item.due_date);
            record.set_int(EARLIEST_START_TIME, item.earliest_start_time);
        }
        Row::Tag(tag) => {
            record.set_text(NAME, Some(&tag.name));
            record.set_text(COLOR, tag.color.as_deref());
            record.set_int(CREATED_AT, Some(tag.created_at));
        }
        Row::ItemTag(link) => {
            record.set_text(ITEM_ID, Some(&link.item_id));
            record.set_text(TAG_ID, Some(&link.tag_id));
            record.set_int(CREATED_AT, Some(link.created_at));
        }
        Row::TimeEntry(entry) => {
            record.set_text(ITEM_ID, Some(&entry.item_id));
            record.set_int(STARTED_AT, Some(entry.started_at));
            record.set_int(ENDED_AT, entry.ended_at);
            record.set_int(CREATED_AT, Some(entry.created_at));
        }
        Row::SavedSearch(search) => {
            record.set_text(NAME, Some(&search.name));
            record.set_text(QUERY, Some(&search.query));
            record.set_int(SORT_ORDER, Some(search.sort_order));
            record.set_int(CREATED_AT, Some(search.created_at));
        }
    }
    record.set_int(MODIFIED_AT, Some(row.meta().modified_at));
}

struct FieldReader<'a> {
    record: &'a RemoteRecord,
    kind: RecordKind,
}

impl FieldReader<'_> {
    fn missing(&self, field: &'static str) -> ConvertError {
        ConvertError::MissingField {
            kind: self.kind,
            record_name: self.record.record_name.clone(),
            field,
        }
    }

    fn invalid(&self, field: &'static str, expected: &str) -> ConvertError {
        ConvertError::InvalidField {
            kind: self.kind,
            record_name: self.record.record_name.clone(),
            field,
            message: format!("expected {expected}"),
        }
    }

    fn optional_text(&self, field: &'static str) -> ConvertResult<Option<String>> {
        match self.record.fields.get(field) {
            None => Ok(None),
            Some(FieldValue::Text(text)) => Ok(Some(text.clone())),
            Some(FieldValue::Int(_)) => Err(self.invalid(field, "text")),
        }
    }

    fn required_text(&self, field: &'static str) -> ConvertResult<String> {
        self.optional_text(field)?
            .ok_or_else(|| self.missing(field))
    }

    /// Foreign keys: an empty string is normalized to null.
    fn optional_ref(&self, field: &'static str) -> ConvertResult<Option<String>> {
        Ok(self.optional_text(field)?.filter(|id| !id.is_empty()))
    }

    fn required_ref(&self, field: &'static str) -> ConvertResult<String> {
        self.optional_ref(field)?
            .ok_or_else(|| self.missing(field))
    }

    fn optional_int(&self, field: &'static str) -> ConvertResult<Option<i64>> {
        match self.record.fields.get(field) {
            None => Ok(None),
            Some(FieldValue::Int(value)) => Ok(Some(*value)),
            Some(FieldValue::Text(_)) => Err(self.invalid(field, "integer")),
        }
    }

    fn required_int(&self, field: &'static str) -> ConvertResult<i64> {
        self.optional_int(field)?
            .ok_or_else(|| self.missing(field))
    }
}
