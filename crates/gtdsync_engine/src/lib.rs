//! # gtdsync engine
//!
//! Bidirectional replication between a gtdsync [`LocalStore`] and a remote
//! record container.
//!
//! This crate provides:
//! - The sync state machine (disabled → idle → syncing / initial sync → idle)
//! - Debounced, periodic and notification-driven triggers, single-flight
//! - Push in dependency order, chunked to the service's per-call limit
//! - Paged pull with the cursor saved after every applied page
//! - Last-write-wins conflict resolution
//! - Retry with exponential backoff
//! - The remote container abstraction, an HTTP implementation and an
//!   in-memory implementation for tests
//!
//! ## Architecture
//!
//! Each cycle runs **push then pull**:
//! 1. Check the account and make sure the container exists
//! 2. Push pending local rows, parents before children
//! 3. Pull remote changes page by page through the conflict resolver
//!
//! Pushing first means unsent local work reaches the remote side before a
//! full fetch-and-replace can run.
//!
//! ## Key Invariants
//!
//! - `needs_push` is cleared only after the remote side confirms the row
//! - A version tag or system blob is only ever copied from a remote response
//! - The cursor is written last in each page's transaction
//! - Re-applying a page leaves the store unchanged
//!
//! [`LocalStore`]: gtdsync_store::LocalStore

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod http;
mod memory;
mod pull;
mod push;
mod remote;
pub mod resolver;
mod state;

pub use config::{RetryConfig, SyncConfig, DEFAULT_PUSH_BATCH_LIMIT};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use http::{
    status_error, HttpClient, HttpContainer, HttpResponse, LoopbackClient, CONTAINER_MISSING_CODE,
};
pub use memory::{FailOn, InMemoryContainer, DEFAULT_PAGE_SIZE};
pub use remote::RemoteContainer;
pub use state::{CycleOutcome, CycleReport, SyncState, SyncStats, SyncStatus};
