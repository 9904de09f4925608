//! Row mapping between [`Row`] values and the syncable tables.
//!
//! The functions here take a plain [`Connection`], so they work both on the
//! store's connection and inside a caller's transaction.

use crate::error::StoreResult;
use gtdsync_records::{Item, ItemTag, RecordKind, Row, SavedSearch, SyncMeta, Tag, TimeEntry};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Params};

const SYNC_COLUMNS: [&str; 6] = [
    "modified_at",
    "deleted_at",
    "needs_push",
    "remote_name",
    "remote_version_tag",
    "remote_system_blob",
];

fn domain_columns(kind: RecordKind) -> &'static [&'static str] {
    match kind {
        RecordKind::Item => &[
            "id",
            "title",
            "item_type",
            "notes",
            "parent_id",
            "sort_order",
            "created_at",
            "completed_at",
            "due_date",
            "earliest_start_time",
        ],
        RecordKind::Tag => &["id", "name", "color", "created_at"],
        RecordKind::ItemTag => &["id", "item_id", "tag_id", "created_at"],
        RecordKind::TimeEntry => &["id", "item_id", "started_at", "ended_at", "created_at"],
        RecordKind::SavedSearch => &["id", "name", "query", "sort_order", "created_at"],
    }
}

fn columns(kind: RecordKind) -> impl Iterator<Item = &'static str> {
    domain_columns(kind).iter().copied().chain(SYNC_COLUMNS)
}

fn select_sql(kind: RecordKind, filter: &str) -> String {
    let columns: Vec<&str> = columns(kind).collect();
    format!(
        "SELECT {} FROM {} {filter}",
        columns.join(", "),
        kind.table_name()
    )
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn opt_text(value: Option<&str>) -> Value {
    value.map(text).unwrap_or(Value::Null)
}

fn opt_int(value: Option<i64>) -> Value {
    value.map(Value::Integer).unwrap_or(Value::Null)
}

/// Column values in the order of `columns(row.kind())`.
fn row_values(row: &Row) -> Vec<Value> {
    let mut values = match row {
        Row::Item(item) => vec![
            text(&item.id),
            text(&item.title),
            text(&item.item_type),
            opt_text(item.notes.as_deref()),
            opt_text(item.parent_id.as_deref()),
            Value::Integer(item.sort_order),
            Value::Integer(item.created_at),
            opt_int(item.completed_at),
            opt_int(item.due_date),
            opt_int(item.earliest_start_time),
        ],
        Row::Tag(tag) => vec![
            text(&tag.id),
            text(&tag.name),
            opt_text(tag.color.as_deref()),
            Value::Integer(tag.created_at),
        ],
        Row::ItemTag(link) => vec![
            text(&link.id),
            text(&link.item_id),
            text(&link.tag_id),
            Value::Integer(link.created_at),
        ],
        Row::TimeEntry(entry) => vec![
            text(&entry.id),
            text(&entry.item_id),
            Value::Integer(entry.started_at),
            opt_int(entry.ended_at),
            Value::Integer(entry.created_at),
        ],
        Row::SavedSearch(search) => vec![
            text(&search.id),
            text(&search.name),
            text(&search.query),
            Value::Integer(search.sort_order),
            Value::Integer(search.created_at),
        ],
    };

    let meta = row.meta();
    values.extend([
        Value::Integer(meta.modified_at),
        opt_int(meta.deleted_at),
        Value::Integer(i64::from(meta.needs_push)),
        text(&meta.remote_name),
        opt_text(meta.remote_version_tag.as_deref()),
        meta.remote_system_blob
            .clone()
            .map(Value::Blob)
            .unwrap_or(Value::Null),
    ]);
    values
}

fn meta_from_sql(r: &rusqlite::Row<'_>) -> rusqlite::Result<SyncMeta> {
    Ok(SyncMeta {
        modified_at: r.get("modified_at")?,
        deleted_at: r.get("deleted_at")?,
        needs_push: r.get("needs_push")?,
        remote_name: r.get("remote_name")?,
        remote_version_tag: r.get("remote_version_tag")?,
        remote_system_blob: r.get("remote_system_blob")?,
    })
}

fn row_from_sql(kind: RecordKind, r: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let meta = meta_from_sql(r)?;
    let row = match kind {
        RecordKind::Item => Row::Item(Item {
            id: r.get("id")?,
            title: r.get("title")?,
            item_type: r.get("item_type")?,
            notes: r.get("notes")?,
            parent_id: r.get("parent_id")?,
            sort_order: r.get("sort_order")?,
            created_at: r.get("created_at")?,
            completed_at: r.get("completed_at")?,
            due_date: r.get("due_date")?,
            earliest_start_time: r.get("earliest_start_time")?,
            meta,
        }),
        RecordKind::Tag => Row::Tag(Tag {
            id: r.get("id")?,
            name: r.get("name")?,
            color: r.get("color")?,
            created_at: r.get("created_at")?,
            meta,
        }),
        RecordKind::ItemTag => Row::ItemTag(ItemTag {
            id: r.get("id")?,
            item_id: r.get("item_id")?,
            tag_id: r.get("tag_id")?,
            created_at: r.get("created_at")?,
            meta,
        }),
        RecordKind::TimeEntry => Row::TimeEntry(TimeEntry {
            id: r.get("id")?,
            item_id: r.get("item_id")?,
            started_at: r.get("started_at")?,
            ended_at: r.get("ended_at")?,
            created_at: r.get("created_at")?,
            meta,
        }),
        RecordKind::SavedSearch => Row::SavedSearch(SavedSearch {
            id: r.get("id")?,
            name: r.get("name")?,
            query: r.get("query")?,
            sort_order: r.get("sort_order")?,
            created_at: r.get("created_at")?,
            meta,
        }),
    };
    Ok(row)
}

/// Selects rows of `kind` matching a `WHERE`/`ORDER BY` clause.
pub fn select<P: Params>(
    conn: &Connection,
    kind: RecordKind,
    filter: &str,
    params: P,
) -> StoreResult<Vec<Row>> {
    let mut stmt = conn.prepare(&select_sql(kind, filter))?;
    let rows = stmt
        .query_map(params, |r| row_from_sql(kind, r))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Loads a row by id, including tombstones.
pub fn get(conn: &Connection, kind: RecordKind, id: &str) -> StoreResult<Option<Row>> {
    let row = conn
        .prepare_cached(&select_sql(kind, "WHERE id = ?1"))?
        .query_row([id], |r| row_from_sql(kind, r))
        .optional()?;
    Ok(row)
}

/// Loads a row by its remote record name, including tombstones.
pub fn find_by_remote_name(
    conn: &Connection,
    kind: RecordKind,
    remote_name: &str,
) -> StoreResult<Option<Row>> {
    let row = conn
        .prepare_cached(&select_sql(kind, "WHERE remote_name = ?1"))?
        .query_row([remote_name], |r| row_from_sql(kind, r))
        .optional()?;
    Ok(row)
}

/// Returns true if a row with this id is stored, live or tombstoned.
pub fn exists(conn: &Connection, kind: RecordKind, id: &str) -> StoreResult<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?1", kind.table_name());
    let found = conn
        .prepare_cached(&sql)?
        .query_row([id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

/// All rows of a kind, tombstones included.
pub fn all(conn: &Connection, kind: RecordKind) -> StoreResult<Vec<Row>> {
    select(conn, kind, "ORDER BY id", [])
}

/// Rows of a kind awaiting push.
pub fn pending(conn: &Connection, kind: RecordKind) -> StoreResult<Vec<Row>> {
    select(conn, kind, "WHERE needs_push = 1 ORDER BY modified_at, id", [])
}

/// Inserts a row, or replaces every column of the existing row with the same id.
pub fn upsert(conn: &Connection, row: &Row) -> StoreResult<()> {
    let kind = row.kind();
    let columns: Vec<&str> = columns(kind).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let updates: Vec<String> = columns
        .iter()
        .skip(1)
        .map(|column| format!("{column} = excluded.{column}"))
        .collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(id) DO UPDATE SET {}",
        kind.table_name(),
        columns.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    );
    conn.prepare_cached(&sql)?
        .execute(params_from_iter(row_values(row)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::init(&conn).unwrap();
        conn
    }

    #[test]
    fn upsert_replaces_all_columns() {
        let conn = conn();
        let mut tag = Tag {
            id: "t".into(),
            name: "home".into(),
            color: Some("#00ff00".into()),
            created_at: 10,
            meta: SyncMeta::new_local("t", 10),
        };
        upsert(&conn, &Row::Tag(tag.clone())).unwrap();

        tag.color = None;
        tag.meta.needs_push = false;
        tag.meta.remote_version_tag = Some("v1".into());
        tag.meta.remote_system_blob = Some(vec![7]);
        upsert(&conn, &Row::Tag(tag.clone())).unwrap();

        let stored = get(&conn, RecordKind::Tag, "t").unwrap().unwrap();
        assert_eq!(stored, Row::Tag(tag));
        assert!(exists(&conn, RecordKind::Tag, "t").unwrap());
        assert!(!exists(&conn, RecordKind::Tag, "x").unwrap());
    }

    #[test]
    fn pending_only_returns_flagged_rows() {
        let conn = conn();
        let mut clean = SavedSearch {
            id: "clean".into(),
            name: "Inbox".into(),
            query: "parent:none".into(),
            sort_order: 0,
            created_at: 1,
            meta: SyncMeta::new_local("clean", 1),
        };
        clean.meta.needs_push = false;
        let mut dirty = clean.clone();
        dirty.id = "dirty".into();
        dirty.meta = SyncMeta::new_local("dirty", 2);
        upsert(&conn, &Row::SavedSearch(clean)).unwrap();
        upsert(&conn, &Row::SavedSearch(dirty)).unwrap();

        let pending = pending(&conn, RecordKind::SavedSearch).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id(), "dirty");
        assert_eq!(all(&conn, RecordKind::SavedSearch).unwrap().len(), 2);
    }
}
