//! Remote container protocol types.
//!
//! These are the values exchanged with the record service. The HTTP
//! container sends them as CBOR bodies; the in-memory container passes them
//! around directly.

use crate::codec::{decode, encode};
use crate::error::CodecError;
use crate::record::{RecordRef, RemoteRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Whether the user's remote account can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    /// Signed in and reachable.
    Available,
    /// No account is signed in on this device.
    NoAccount,
    /// The account exists but access is restricted (parental controls, MDM).
    Restricted,
    /// The account service could not be reached right now.
    TemporarilyUnavailable,
}

impl AccountStatus {
    /// Returns true if sync may proceed.
    pub fn is_available(&self) -> bool {
        matches!(self, AccountStatus::Available)
    }
}

/// One page of the remote change feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePage {
    /// Records created or changed since the cursor.
    pub records: Vec<RemoteRecord>,
    /// Records deleted since the cursor.
    pub deleted: Vec<RecordRef>,
    /// Opaque cursor positioned after this page.
    pub next_cursor: Vec<u8>,
    /// True if more pages follow.
    pub has_more: bool,
    /// Estimated number of records in the whole feed, when known.
    pub approximate_total: Option<u64>,
}

/// Why the service refused a single record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemError {
    /// The submitted system blob is stale.
    Conflict {
        /// Current server version, if the service returned it.
        server_record: Option<Box<RemoteRecord>>,
    },
    /// The record the update refers to no longer exists.
    UnknownItem,
    /// The record was malformed.
    Invalid(String),
}

/// Per-record result of a submit call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemOutcome {
    /// The upsert was accepted; the record carries the new version.
    Saved(RemoteRecord),
    /// The delete was accepted.
    Deleted {
        /// Deleted record name.
        record_name: String,
    },
    /// The record was refused.
    Rejected {
        /// Refused record name.
        record_name: String,
        /// Reason.
        error: ItemError,
    },
}

impl ItemOutcome {
    /// Name of the record this outcome is about.
    pub fn record_name(&self) -> &str {
        match self {
            ItemOutcome::Saved(record) => &record.record_name,
            ItemOutcome::Deleted { record_name } | ItemOutcome::Rejected { record_name, .. } => {
                record_name
            }
        }
    }
}

/// Remote change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// Container that changed.
    pub container_id: String,
}

/// Request body for account and container calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRequest {
    /// Target container.
    pub container_id: String,
}

/// Response body of the account status call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatusResponse {
    /// Current status.
    pub status: AccountStatus,
}

/// Request body of the submit call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Target container.
    pub container_id: String,
    /// Records to create or update.
    pub upserts: Vec<RemoteRecord>,
    /// Records to delete.
    pub deletes: Vec<RecordRef>,
}

/// Response body of the submit call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// One outcome per submitted record.
    pub outcomes: Vec<ItemOutcome>,
}

/// Request body of the fetch call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Target container.
    pub container_id: String,
    /// Cursor from the previous page, or `None` for the whole feed.
    pub cursor: Option<Vec<u8>>,
}

/// Error body returned with non-success HTTP statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code, e.g. `container_missing`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Server back-off hint in seconds.
    pub retry_after_secs: Option<u64>,
}

/// CBOR encoding shared by every protocol message.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Encodes to CBOR.
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }

    /// Decodes from CBOR.
    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode(bytes)
    }
}

impl WireMessage for ChangePage {}
impl WireMessage for ContainerRequest {}
impl WireMessage for AccountStatusResponse {}
impl WireMessage for SubmitRequest {}
impl WireMessage for SubmitResponse {}
impl WireMessage for FetchRequest {}
impl WireMessage for ErrorBody {}
