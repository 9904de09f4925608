//! # gtdsync records
//!
//! Row model, wire records and the Record Converter for gtdsync.
//!
//! This crate provides:
//! - The five syncable record kinds and their local row model
//! - The wire record format exchanged with the remote container
//! - Conversion between rows and wire records
//! - Push ordering (parents before children, deletes children-first)
//! - Remote protocol messages and their CBOR encoding
//!
//! Nothing here performs I/O. Every function is safe to call from any thread.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod convert;
mod error;
mod kind;
mod model;
mod order;
mod protocol;
mod record;

pub use codec::{decode, encode};
pub use convert::{fields, from_remote, from_remote_any, to_remote, update_in_place};
pub use error::{CodecError, ConvertError, ConvertResult};
pub use kind::RecordKind;
pub use model::{Item, ItemTag, Row, SavedSearch, SyncMeta, Tag, TimeEntry};
pub use order::{plan_push, PushPlan, StoredRefs};
pub use protocol::{
    AccountStatus, AccountStatusResponse, ChangeNotification, ChangePage, ContainerRequest,
    ErrorBody, FetchRequest, ItemError, ItemOutcome, SubmitRequest, SubmitResponse, WireMessage,
};
pub use record::{FieldValue, RecordRef, RemoteRecord};
