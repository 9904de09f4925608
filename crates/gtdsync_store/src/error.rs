//! Error types for the local store.

use gtdsync_records::{ConvertError, RecordKind};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the local store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored row could not be converted.
    #[error("conversion error: {0}")]
    Convert(#[from] ConvertError),

    /// Row not found.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Kind searched.
        kind: RecordKind,
        /// Id searched.
        id: String,
    },

    /// The operation is not valid for the row's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl StoreError {
    /// Creates a not-found error.
    pub fn not_found(kind: RecordKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}
