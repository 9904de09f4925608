//! # gtdsync store
//!
//! SQLite-backed local store for gtdsync.
//!
//! This crate provides:
//! - The syncable tables and their row mapping
//! - Local mutations that stamp `modified_at` and flag rows for push
//! - The Sync Metadata Store (cursor, device id, last sync time)
//! - Reconciliation primitives used by the sync engine
//! - The Soft-Delete Service (cascading tombstones and purge)
//!
//! ## Transactions
//!
//! All writes go through [`LocalStore::write`], one transaction per call.
//! The sync engine applies each remote page and saves its cursor in the same
//! transaction, cursor last.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod error;
pub mod metadata;
pub mod reconcile;
mod schema;
mod soft_delete;
mod store;
pub mod table;

pub use clock::{Clock, ManualClock};
pub use error::{StoreError, StoreResult};
pub use metadata::SyncMetadata;
pub use schema::SCHEMA_VERSION;
pub use soft_delete::{PurgeReport, SoftDeleteService, DEFAULT_CHUNK_SIZE, DEFAULT_RETENTION};
pub use store::{KindCounts, LocalStore, NewItem};
