//! Remote container abstraction.

use crate::error::SyncResult;
use async_trait::async_trait;
use gtdsync_records::{AccountStatus, ChangeNotification, ChangePage, ItemOutcome, RecordRef, RemoteRecord};
use tokio::sync::broadcast;

/// The cloud record service, as seen by the engine.
///
/// Implemented by [`HttpContainer`](crate::HttpContainer) for a real
/// service and [`InMemoryContainer`](crate::InMemoryContainer) for tests.
#[async_trait]
pub trait RemoteContainer: Send + Sync + 'static {
    /// Checks whether the user's account can be used.
    async fn account_status(&self) -> SyncResult<AccountStatus>;

    /// Creates the container if it does not exist.
    async fn ensure_container_exists(&self) -> SyncResult<()>;

    /// Submits one batch of upserts and deletes.
    ///
    /// Returns one outcome per record. A rejected record does not fail the
    /// call; only whole-call failures are returned as errors.
    async fn submit_changes(
        &self,
        upserts: Vec<RemoteRecord>,
        deletes: Vec<RecordRef>,
    ) -> SyncResult<Vec<ItemOutcome>>;

    /// Fetches the next page of changes after `cursor`, or from the start.
    async fn fetch_changes(&self, cursor: Option<Vec<u8>>) -> SyncResult<ChangePage>;

    /// Subscribes to remote change notifications.
    fn register_for_change_notifications(&self) -> broadcast::Receiver<ChangeNotification>;
}
