//! Wire record format.

use crate::kind::RecordKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single field value in a wire record. Absent keys mean null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    /// UTF-8 text.
    Text(String),
    /// Signed integer (timestamps, sort orders).
    Int(i64),
}

impl FieldValue {
    /// Returns the text value, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            FieldValue::Int(_) => None,
        }
    }

    /// Returns the integer value, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(value) => Some(*value),
            FieldValue::Text(_) => None,
        }
    }
}

/// A record as exchanged with the remote container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Declared record type, e.g. `"Item"`.
    pub record_type: String,
    /// Stable record name (the row's `remote_name`).
    pub record_name: String,
    /// Domain fields keyed by wire field name.
    pub fields: BTreeMap<String, FieldValue>,
    /// Remote version tag, set by the service.
    pub version_tag: Option<String>,
    /// Opaque system blob, set by the service.
    pub system_blob: Option<Vec<u8>>,
}

impl RemoteRecord {
    /// Creates an empty record of the given kind.
    pub fn new(kind: RecordKind, record_name: impl Into<String>) -> Self {
        Self {
            record_type: kind.record_type().to_string(),
            record_name: record_name.into(),
            fields: BTreeMap::new(),
            version_tag: None,
            system_blob: None,
        }
    }

    /// The declared kind, if the record type is known.
    pub fn kind(&self) -> Option<RecordKind> {
        RecordKind::from_record_type(&self.record_type)
    }

    /// Sets a text field, removing it when `None`.
    pub fn set_text(&mut self, key: &str, value: Option<&str>) {
        match value {
            Some(text) => {
                self.fields
                    .insert(key.to_string(), FieldValue::Text(text.to_string()));
            }
            None => {
                self.fields.remove(key);
            }
        }
    }

    /// Sets an integer field, removing it when `None`.
    pub fn set_int(&mut self, key: &str, value: Option<i64>) {
        match value {
            Some(value) => {
                self.fields.insert(key.to_string(), FieldValue::Int(value));
            }
            None => {
                self.fields.remove(key);
            }
        }
    }

    /// Reads a text field.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(FieldValue::as_text)
    }

    /// Reads an integer field.
    pub fn int(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(FieldValue::as_int)
    }
}

/// Reference to a record by name, used for deletes and deletion notices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    /// Record name.
    pub record_name: String,
    /// Kind hint; `None` means every table must be searched.
    pub kind: Option<RecordKind>,
    /// When the record was deleted, if the service reports it.
    pub deleted_at: Option<i64>,
}

impl RecordRef {
    /// Creates a reference with a kind hint.
    pub fn new(kind: RecordKind, record_name: impl Into<String>, deleted_at: Option<i64>) -> Self {
        Self {
            record_name: record_name.into(),
            kind: Some(kind),
            deleted_at,
        }
    }
}
