//! Error types for record conversion and encoding.

use crate::kind::RecordKind;
use thiserror::Error;

/// Result type for record conversion.
pub type ConvertResult<T> = Result<T, ConvertError>;

/// Errors raised when a row and a wire record cannot be translated.
///
/// These are row-level: callers log them and skip the row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    /// The record's declared type does not match the target table.
    #[error("record {record_name} has type {found}, expected {expected}")]
    KindMismatch {
        /// Record name.
        record_name: String,
        /// Kind of the target table.
        expected: RecordKind,
        /// Declared record type.
        found: String,
    },

    /// The record type is not one of the syncable kinds.
    #[error("unknown record type {record_type} for record {record_name}")]
    UnknownRecordType {
        /// Record name.
        record_name: String,
        /// Declared record type.
        record_type: String,
    },

    /// A required field is absent or empty.
    #[error("{kind} record {record_name} is missing field {field}")]
    MissingField {
        /// Kind being converted.
        kind: RecordKind,
        /// Record name.
        record_name: String,
        /// Wire field name.
        field: &'static str,
    },

    /// A field has the wrong type or an invalid value.
    #[error("{kind} record {record_name} has invalid field {field}: {message}")]
    InvalidField {
        /// Kind being converted.
        kind: RecordKind,
        /// Record name.
        record_name: String,
        /// Wire field name.
        field: &'static str,
        /// What is wrong.
        message: String,
    },

    /// A foreign key points at a row that is neither stored nor pending.
    #[error("{kind} {id} references missing {target_kind} {target_id}")]
    DanglingReference {
        /// Kind of the referencing row.
        kind: RecordKind,
        /// Id of the referencing row.
        id: String,
        /// Kind of the referenced row.
        target_kind: RecordKind,
        /// Id of the referenced row.
        target_id: String,
    },

    /// The row is part of a reference cycle.
    #[error("{kind} {id} is part of a reference cycle")]
    CyclicReference {
        /// Kind of the row.
        kind: RecordKind,
        /// Id of the row.
        id: String,
    },
}

/// Errors raised by the CBOR codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Encoding failed.
    #[error("CBOR encode error: {0}")]
    Encode(String),

    /// Decoding failed.
    #[error("CBOR decode error: {0}")]
    Decode(String),
}
