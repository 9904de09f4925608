//! Error types for the sync engine.

use gtdsync_records::{AccountStatus, CodecError};
use gtdsync_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced to the sync state machine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No usable account; resolved outside the engine.
    #[error("remote account unavailable: {0:?}")]
    AccountUnavailable(AccountStatus),

    /// Network or transport failure.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// The service asked us to slow down.
    #[error("remote quota exceeded")]
    QuotaExceeded {
        /// Server back-off hint.
        retry_after: Option<Duration>,
    },

    /// The remote container does not exist.
    #[error("remote container missing")]
    ContainerMissing,

    /// The stored change cursor is no longer accepted.
    #[error("change cursor expired")]
    CursorExpired,

    /// A record was rejected as stale. Handled per row, never fails a cycle.
    #[error("conflict on record {record_name}")]
    Conflict {
        /// Conflicting record.
        record_name: String,
    },

    /// Local store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Encoding or decoding failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Anything else reported by the remote side.
    #[error("{0}")]
    Unknown(String),
}

impl SyncError {
    /// Returns true if the failure is transient and retried under backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::NetworkFailure(_) | SyncError::QuotaExceeded { .. }
        )
    }

    /// Returns true if a full resync recovers from this failure.
    pub fn needs_full_resync(&self) -> bool {
        matches!(self, SyncError::ContainerMissing | SyncError::CursorExpired)
    }

    /// The server's back-off hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::QuotaExceeded { retry_after } => *retry_after,
            _ => None,
        }
    }
}
