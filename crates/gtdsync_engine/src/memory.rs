//! In-memory remote container.
//!
//! Behaves like the real record service closely enough for deterministic
//! tests: optimistic concurrency through its own system blobs, a paginated
//! change feed with opaque cursors, a per-call record limit, and hooks to
//! inject failures or simulate writes from other devices.

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteContainer;
use async_trait::async_trait;
use gtdsync_records::{
    decode, encode, AccountStatus, ChangeNotification, ChangePage, ItemError, ItemOutcome,
    RecordKind, RecordRef, RemoteRecord,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::broadcast;
use tracing::debug;

/// Default records per fetched page.
pub const DEFAULT_PAGE_SIZE: usize = 200;

/// Which call an injected failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    /// Whichever call comes next.
    Any,
    /// `account_status`.
    AccountStatus,
    /// `ensure_container_exists`.
    EnsureContainer,
    /// `submit_changes`.
    Submit,
    /// `fetch_changes`.
    Fetch,
}

#[derive(Debug, Serialize, Deserialize)]
struct Cursor {
    epoch: u64,
    seq: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SystemBlob {
    container: String,
    record_name: String,
    change_tag: String,
}

#[derive(Debug, Clone)]
enum EntryState {
    Live(RemoteRecord),
    Deleted {
        kind: Option<RecordKind>,
        deleted_at: Option<i64>,
    },
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    state: EntryState,
}

#[derive(Debug)]
struct Inner {
    exists: bool,
    account: AccountStatus,
    epoch: u64,
    seq: u64,
    version: u64,
    entries: BTreeMap<String, Entry>,
    failures: VecDeque<(FailOn, SyncError)>,
    submit_batch_sizes: Vec<usize>,
}

/// An in-memory record container.
pub struct InMemoryContainer {
    container_id: String,
    page_size: usize,
    max_batch: usize,
    inner: Mutex<Inner>,
    notifications: broadcast::Sender<ChangeNotification>,
}

impl InMemoryContainer {
    /// Creates an empty, existing container.
    pub fn new(container_id: impl Into<String>) -> Self {
        let (notifications, _) = broadcast::channel(64);
        Self {
            container_id: container_id.into(),
            page_size: DEFAULT_PAGE_SIZE,
            max_batch: crate::config::DEFAULT_PUSH_BATCH_LIMIT,
            inner: Mutex::new(Inner {
                exists: true,
                account: AccountStatus::Available,
                epoch: 1,
                seq: 0,
                version: 0,
                entries: BTreeMap::new(),
                failures: VecDeque::new(),
                submit_batch_sizes: Vec::new(),
            }),
            notifications,
        }
    }

    /// Sets the number of changes per fetched page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Sets the per-call record limit.
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    /// Container identifier.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Makes the next matching call fail with `error`.
    pub fn fail_next(&self, on: FailOn, error: SyncError) {
        self.inner.lock().failures.push_back((on, error));
    }

    /// Changes the reported account status.
    pub fn set_account_status(&self, status: AccountStatus) {
        self.inner.lock().account = status;
    }

    /// Invalidates every cursor handed out so far.
    pub fn expire_cursors(&self) {
        self.inner.lock().epoch += 1;
    }

    /// Deletes the container and all of its records.
    pub fn delete_container(&self) {
        let mut inner = self.inner.lock();
        inner.exists = false;
        inner.entries.clear();
        inner.epoch += 1;
    }

    /// Writes a record as another device would, bypassing conflict checks.
    ///
    /// Returns the stored record with its new version.
    pub fn remote_put(&self, record: RemoteRecord) -> RemoteRecord {
        let mut inner = self.inner.lock();
        self.store_record(&mut inner, record)
    }

    /// Deletes a record as another device would.
    pub fn remote_delete(&self, kind: RecordKind, record_name: &str, deleted_at: i64) {
        let mut inner = self.inner.lock();
        Self::delete_record(&mut inner, Some(kind), record_name, Some(deleted_at));
    }

    /// Sends a change notification to every subscriber.
    pub fn notify_subscribers(&self) {
        let _ = self.notifications.send(ChangeNotification {
            container_id: self.container_id.clone(),
        });
    }

    /// The live record with this name.
    pub fn record(&self, record_name: &str) -> Option<RemoteRecord> {
        match &self.inner.lock().entries.get(record_name)?.state {
            EntryState::Live(record) => Some(record.clone()),
            EntryState::Deleted { .. } => None,
        }
    }

    /// Returns true if the record exists and is deleted.
    pub fn is_deleted(&self, record_name: &str) -> bool {
        matches!(
            self.inner.lock().entries.get(record_name),
            Some(Entry {
                state: EntryState::Deleted { .. },
                ..
            })
        )
    }

    /// Number of live records.
    pub fn live_record_count(&self) -> usize {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|entry| matches!(entry.state, EntryState::Live(_)))
            .count()
    }

    /// Sizes of every submit call received, in order.
    pub fn submit_batch_sizes(&self) -> Vec<usize> {
        self.inner.lock().submit_batch_sizes.clone()
    }

    fn check(&self, inner: &mut Inner, call: FailOn) -> SyncResult<()> {
        if let Some(position) = inner
            .failures
            .iter()
            .position(|(on, _)| *on == FailOn::Any || *on == call)
        {
            if let Some((_, error)) = inner.failures.remove(position) {
                debug!(?call, %error, "injected failure");
                return Err(error);
            }
        }
        if call == FailOn::AccountStatus {
            return Ok(());
        }
        if !inner.account.is_available() {
            return Err(SyncError::AccountUnavailable(inner.account));
        }
        if call != FailOn::EnsureContainer && !inner.exists {
            return Err(SyncError::ContainerMissing);
        }
        Ok(())
    }

    fn next_seq(inner: &mut Inner) -> u64 {
        inner.seq += 1;
        inner.seq
    }

    fn store_record(&self, inner: &mut Inner, mut record: RemoteRecord) -> RemoteRecord {
        inner.version += 1;
        let change_tag = format!("v{}", inner.version);
        let blob = SystemBlob {
            container: self.container_id.clone(),
            record_name: record.record_name.clone(),
            change_tag: change_tag.clone(),
        };
        record.system_blob = encode(&blob).ok();
        record.version_tag = Some(change_tag);

        let seq = Self::next_seq(inner);
        inner.entries.insert(
            record.record_name.clone(),
            Entry {
                seq,
                state: EntryState::Live(record.clone()),
            },
        );
        record
    }

    fn delete_record(
        inner: &mut Inner,
        kind: Option<RecordKind>,
        record_name: &str,
        deleted_at: Option<i64>,
    ) {
        let live = matches!(
            inner.entries.get(record_name),
            Some(Entry {
                state: EntryState::Live(_),
                ..
            })
        );
        if !live {
            return;
        }
        let seq = Self::next_seq(inner);
        inner.entries.insert(
            record_name.to_string(),
            Entry {
                seq,
                state: EntryState::Deleted { kind, deleted_at },
            },
        );
    }

    fn save(&self, inner: &mut Inner, record: RemoteRecord) -> ItemOutcome {
        let submitted_tag = record
            .system_blob
            .as_deref()
            .and_then(|bytes| decode::<SystemBlob>(bytes).ok())
            .map(|blob| blob.change_tag);
        let current = inner.entries.get(&record.record_name).map(|e| &e.state);

        let rejection = match (current, submitted_tag) {
            (None | Some(EntryState::Deleted { .. }), None) => None,
            (None | Some(EntryState::Deleted { .. }), Some(_)) => Some(ItemError::UnknownItem),
            (Some(EntryState::Live(existing)), Some(tag))
                if existing.version_tag.as_deref() == Some(tag.as_str()) =>
            {
                None
            }
            (Some(EntryState::Live(existing)), _) => Some(ItemError::Conflict {
                server_record: Some(Box::new(existing.clone())),
            }),
        };

        match rejection {
            Some(error) => ItemOutcome::Rejected {
                record_name: record.record_name,
                error,
            },
            None => ItemOutcome::Saved(self.store_record(inner, record)),
        }
    }

    fn page(&self, inner: &Inner, after: Option<u64>) -> ChangePage {
        let mut changes: Vec<(&String, &Entry)> = inner
            .entries
            .iter()
            .filter(|(_, entry)| match after {
                Some(seq) => entry.seq > seq,
                None => matches!(entry.state, EntryState::Live(_)),
            })
            .collect();
        changes.sort_by_key(|(_, entry)| entry.seq);

        let total = changes.len();
        let has_more = total > self.page_size;
        changes.truncate(self.page_size);

        let last_seq = changes
            .last()
            .map(|(_, entry)| entry.seq)
            .or(after)
            .unwrap_or(inner.seq);
        // A complete page positions the cursor at the head of the feed.
        let next_seq = if has_more { last_seq } else { inner.seq };

        let mut page = ChangePage {
            approximate_total: Some(total as u64),
            has_more,
            ..ChangePage::default()
        };
        for (name, entry) in changes {
            match &entry.state {
                EntryState::Live(record) => page.records.push(record.clone()),
                EntryState::Deleted { kind, deleted_at } => page.deleted.push(RecordRef {
                    record_name: name.clone(),
                    kind: *kind,
                    deleted_at: *deleted_at,
                }),
            }
        }
        page.next_cursor = encode(&Cursor {
            epoch: inner.epoch,
            seq: next_seq,
        })
        .unwrap_or_default();
        page
    }
}

#[async_trait]
impl RemoteContainer for InMemoryContainer {
    async fn account_status(&self) -> SyncResult<AccountStatus> {
        let mut inner = self.inner.lock();
        self.check(&mut inner, FailOn::AccountStatus)?;
        Ok(inner.account)
    }

    async fn ensure_container_exists(&self) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        self.check(&mut inner, FailOn::EnsureContainer)?;
        if !inner.exists {
            debug!(container = %self.container_id, "creating container");
            inner.exists = true;
        }
        Ok(())
    }

    async fn submit_changes(
        &self,
        upserts: Vec<RemoteRecord>,
        deletes: Vec<RecordRef>,
    ) -> SyncResult<Vec<ItemOutcome>> {
        let mut inner = self.inner.lock();
        self.check(&mut inner, FailOn::Submit)?;

        let size = upserts.len() + deletes.len();
        if size > self.max_batch {
            return Err(SyncError::Unknown(format!(
                "batch of {size} records exceeds limit of {}",
                self.max_batch
            )));
        }
        inner.submit_batch_sizes.push(size);

        let mut outcomes = Vec::with_capacity(size);
        for record in upserts {
            outcomes.push(self.save(&mut inner, record));
        }
        for reference in deletes {
            Self::delete_record(
                &mut inner,
                reference.kind,
                &reference.record_name,
                reference.deleted_at,
            );
            outcomes.push(ItemOutcome::Deleted {
                record_name: reference.record_name,
            });
        }
        Ok(outcomes)
    }

    async fn fetch_changes(&self, cursor: Option<Vec<u8>>) -> SyncResult<ChangePage> {
        let mut inner = self.inner.lock();
        self.check(&mut inner, FailOn::Fetch)?;

        let after = match cursor {
            None => None,
            Some(bytes) => {
                let cursor: Cursor = decode(&bytes).map_err(|_| SyncError::CursorExpired)?;
                if cursor.epoch != inner.epoch {
                    return Err(SyncError::CursorExpired);
                }
                Some(cursor.seq)
            }
        };
        Ok(self.page(&inner, after))
    }

    fn register_for_change_notifications(&self) -> broadcast::Receiver<ChangeNotification> {
        self.notifications.subscribe()
    }
}
