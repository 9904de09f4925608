//! End-to-end tests for the sync engine against the in-memory container.

use async_trait::async_trait;
use gtdsync_engine::resolver::{self, Resolution};
use gtdsync_engine::{
    CycleOutcome, CycleReport, FailOn, HttpContainer, InMemoryContainer, LoopbackClient,
    RemoteContainer, RetryConfig, SyncConfig, SyncEngine, SyncError, SyncResult, SyncState,
};
use gtdsync_records::{
    fields, from_remote, AccountStatus, ChangeNotification, ChangePage, Item, ItemError,
    ItemOutcome, RecordKind, RecordRef, RemoteRecord, Row, SyncMeta, Tag,
};
use gtdsync_store::{metadata, table, LocalStore, ManualClock, NewItem, SoftDeleteService};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn config() -> SyncConfig {
    SyncConfig::new("test").with_retry(
        RetryConfig::new(3)
            .with_initial_delay(Duration::from_secs(2))
            .with_jitter(false),
    )
}

fn device<R: RemoteContainer>(remote: Arc<R>, start: i64) -> (SyncEngine<R>, ManualClock) {
    let clock = ManualClock::new(start);
    let store = LocalStore::open_in_memory()
        .unwrap()
        .with_clock(clock.clock());
    (SyncEngine::new(config(), Arc::new(store), remote), clock)
}

fn setup() -> (SyncEngine<InMemoryContainer>, Arc<InMemoryContainer>, ManualClock) {
    let remote = Arc::new(InMemoryContainer::new("test"));
    let (engine, clock) = device(remote.clone(), 1_000);
    (engine, remote, clock)
}

async fn sync<R: RemoteContainer>(engine: &SyncEngine<R>) -> CycleReport {
    match engine.sync_now().await.unwrap() {
        CycleOutcome::Completed(report) => report,
        other => panic!("expected a completed cycle, got {other:?}"),
    }
}

fn item(store: &LocalStore, id: &str) -> Item {
    match store.get(RecordKind::Item, id).unwrap() {
        Some(Row::Item(item)) => item,
        other => panic!("expected item {id}, got {other:?}"),
    }
}

fn rename(store: &LocalStore, id: &str, title: &str) {
    let mut edited = item(store, id);
    edited.title = title.into();
    store.update_row(edited.into()).unwrap();
}

fn local_rows(store: &LocalStore) -> Vec<Row> {
    RecordKind::ALL
        .into_iter()
        .flat_map(|kind| store.rows(kind).unwrap())
        .collect()
}

fn tag_record(name: &str, modified_at: i64) -> RemoteRecord {
    let mut record = RemoteRecord::new(RecordKind::Tag, name);
    record.set_text(fields::NAME, Some(name));
    record.set_int(fields::MODIFIED_AT, Some(modified_at));
    record
}

/// Wraps the in-memory container and delays every fetch.
struct SlowContainer {
    inner: Arc<InMemoryContainer>,
    delay: Duration,
}

#[async_trait]
impl RemoteContainer for SlowContainer {
    async fn account_status(&self) -> SyncResult<AccountStatus> {
        self.inner.account_status().await
    }

    async fn ensure_container_exists(&self) -> SyncResult<()> {
        self.inner.ensure_container_exists().await
    }

    async fn submit_changes(
        &self,
        upserts: Vec<RemoteRecord>,
        deletes: Vec<RecordRef>,
    ) -> SyncResult<Vec<ItemOutcome>> {
        self.inner.submit_changes(upserts, deletes).await
    }

    async fn fetch_changes(&self, cursor: Option<Vec<u8>>) -> SyncResult<ChangePage> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_changes(cursor).await
    }

    fn register_for_change_notifications(&self) -> broadcast::Receiver<ChangeNotification> {
        self.inner.register_for_change_notifications()
    }
}

/// Renames an item on the local store while the first submit is in flight.
struct EditDuringSubmit {
    inner: Arc<InMemoryContainer>,
    store: Arc<LocalStore>,
    edit: Mutex<Option<(String, String)>>,
}

#[async_trait]
impl RemoteContainer for EditDuringSubmit {
    async fn account_status(&self) -> SyncResult<AccountStatus> {
        self.inner.account_status().await
    }

    async fn ensure_container_exists(&self) -> SyncResult<()> {
        self.inner.ensure_container_exists().await
    }

    async fn submit_changes(
        &self,
        upserts: Vec<RemoteRecord>,
        deletes: Vec<RecordRef>,
    ) -> SyncResult<Vec<ItemOutcome>> {
        let edit = self.edit.lock().take();
        if let Some((id, title)) = edit {
            rename(&self.store, &id, &title);
        }
        self.inner.submit_changes(upserts, deletes).await
    }

    async fn fetch_changes(&self, cursor: Option<Vec<u8>>) -> SyncResult<ChangePage> {
        self.inner.fetch_changes(cursor).await
    }

    fn register_for_change_notifications(&self) -> broadcast::Receiver<ChangeNotification> {
        self.inner.register_for_change_notifications()
    }
}

/// Answers every upsert with a conflict carrying a tag record of the same name.
struct MistypedConflicts {
    inner: Arc<InMemoryContainer>,
}

#[async_trait]
impl RemoteContainer for MistypedConflicts {
    async fn account_status(&self) -> SyncResult<AccountStatus> {
        self.inner.account_status().await
    }

    async fn ensure_container_exists(&self) -> SyncResult<()> {
        self.inner.ensure_container_exists().await
    }

    async fn submit_changes(
        &self,
        upserts: Vec<RemoteRecord>,
        _deletes: Vec<RecordRef>,
    ) -> SyncResult<Vec<ItemOutcome>> {
        Ok(upserts
            .into_iter()
            .map(|record| ItemOutcome::Rejected {
                error: ItemError::Conflict {
                    server_record: Some(Box::new(tag_record(&record.record_name, 5_000))),
                },
                record_name: record.record_name,
            })
            .collect())
    }

    async fn fetch_changes(&self, cursor: Option<Vec<u8>>) -> SyncResult<ChangePage> {
        self.inner.fetch_changes(cursor).await
    }

    fn register_for_change_notifications(&self) -> broadcast::Receiver<ChangeNotification> {
        self.inner.register_for_change_notifications()
    }
}

/// Fails the fetch with the given 1-based call number.
struct FailingFetch {
    inner: Arc<InMemoryContainer>,
    fail_on: usize,
    fetches: AtomicUsize,
}

#[async_trait]
impl RemoteContainer for FailingFetch {
    async fn account_status(&self) -> SyncResult<AccountStatus> {
        self.inner.account_status().await
    }

    async fn ensure_container_exists(&self) -> SyncResult<()> {
        self.inner.ensure_container_exists().await
    }

    async fn submit_changes(
        &self,
        upserts: Vec<RemoteRecord>,
        deletes: Vec<RecordRef>,
    ) -> SyncResult<Vec<ItemOutcome>> {
        self.inner.submit_changes(upserts, deletes).await
    }

    async fn fetch_changes(&self, cursor: Option<Vec<u8>>) -> SyncResult<ChangePage> {
        let call = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(SyncError::NetworkFailure("connection reset".into()));
        }
        self.inner.fetch_changes(cursor).await
    }

    fn register_for_change_notifications(&self) -> broadcast::Receiver<ChangeNotification> {
        self.inner.register_for_change_notifications()
    }
}

#[tokio::test]
async fn first_push_stores_version_and_clears_flag() {
    let (engine, remote, _) = setup();
    engine.enable().await.unwrap();
    let created = engine
        .store()
        .create_item(NewItem::task("Call the bank"))
        .unwrap();
    assert!(created.meta.needs_push);

    let report = sync(&engine).await;
    assert_eq!(report.pushed, 1);
    assert!(report.full_resync);

    let stored = item(engine.store(), &created.id);
    assert!(!stored.meta.needs_push);
    assert!(stored.meta.remote_version_tag.is_some());
    assert!(stored.meta.remote_system_blob.is_some());
    let record = remote.record(&created.id).unwrap();
    assert_eq!(record.text(fields::TITLE), Some("Call the bank"));
    assert_eq!(record.version_tag, stored.meta.remote_version_tag);

    let status = engine.status();
    assert_eq!(status.state, SyncState::Idle);
    assert_eq!(status.last_sync_at, Some(1_000));
    assert!(engine.store().metadata().unwrap().cursor.is_some());
}

#[tokio::test]
async fn newer_remote_edit_overwrites_pending_local_edit() {
    let (engine, remote, clock) = setup();
    engine.enable().await.unwrap();
    let created = engine.store().create_item(NewItem::task("Draft")).unwrap();
    sync(&engine).await;

    clock.set(1_010);
    rename(engine.store(), &created.id, "Local title");

    let mut record = remote.record(&created.id).unwrap();
    record.set_text(fields::TITLE, Some("Remote title"));
    record.set_int(fields::MODIFIED_AT, Some(1_020));
    remote.remote_put(record);

    let report = sync(&engine).await;
    assert_eq!(report.accepted_remote, 1);

    let stored = item(engine.store(), &created.id);
    assert_eq!(stored.title, "Remote title");
    assert_eq!(stored.meta.modified_at, 1_020);
    assert!(!stored.meta.needs_push);
    assert_eq!(remote.record(&created.id).unwrap().text(fields::TITLE), Some("Remote title"));
}

#[tokio::test]
async fn newer_local_edit_wins_and_is_pushed_again() {
    let (engine, remote, clock) = setup();
    engine.enable().await.unwrap();
    let created = engine.store().create_item(NewItem::task("Draft")).unwrap();
    sync(&engine).await;

    let mut record = remote.record(&created.id).unwrap();
    record.set_text(fields::TITLE, Some("Remote title"));
    record.set_int(fields::MODIFIED_AT, Some(1_020));
    remote.remote_put(record);

    clock.set(1_030);
    rename(engine.store(), &created.id, "Local title");

    let report = sync(&engine).await;
    assert_eq!(report.kept_local, 1);
    assert_eq!(report.pushed, 1);

    let stored = item(engine.store(), &created.id);
    assert_eq!(stored.title, "Local title");
    assert!(!stored.meta.needs_push);
    let record = remote.record(&created.id).unwrap();
    assert_eq!(record.text(fields::TITLE), Some("Local title"));
    assert_eq!(record.version_tag, stored.meta.remote_version_tag);
}

#[tokio::test]
async fn pulled_older_record_keeps_local_fields_and_flags_push() {
    let (engine, remote, clock) = setup();
    engine.enable().await.unwrap();
    let created = engine.store().create_item(NewItem::task("Draft")).unwrap();
    sync(&engine).await;

    clock.set(1_030);
    rename(engine.store(), &created.id, "Local title");

    let mut record = remote.record(&created.id).unwrap();
    record.set_text(fields::TITLE, Some("Remote title"));
    record.set_int(fields::MODIFIED_AT, Some(1_020));
    let stored_remote = remote.remote_put(record);

    let incoming = from_remote(&stored_remote, RecordKind::Item).unwrap();
    let resolution = engine
        .store()
        .write(|tx| resolver::apply_record(tx, &incoming))
        .unwrap();
    assert_eq!(resolution, Resolution::KeepLocal);

    let stored = item(engine.store(), &created.id);
    assert_eq!(stored.title, "Local title");
    assert_eq!(stored.meta.modified_at, 1_030);
    assert!(stored.meta.needs_push);
    assert_eq!(stored.meta.remote_version_tag, stored_remote.version_tag);
    assert_eq!(stored.meta.remote_system_blob, stored_remote.system_blob);
}

#[tokio::test]
async fn applying_the_same_page_twice_changes_nothing() {
    let (engine, remote, _) = setup();
    for name in ["home", "office", "errands"] {
        remote.remote_put(tag_record(name, 500));
    }
    let page = remote.fetch_changes(None).await.unwrap();
    let rows: Vec<Row> = page
        .records
        .iter()
        .map(|record| from_remote(record, RecordKind::Tag).unwrap())
        .collect();
    let store = engine.store();

    let apply = || {
        store
            .write(|tx| {
                rows.iter()
                    .map(|row| resolver::apply_record(tx, row))
                    .collect::<Result<Vec<_>, _>>()
            })
            .unwrap()
    };
    assert!(apply().iter().all(|r| *r == Resolution::Insert));
    let first = local_rows(store);

    assert!(apply().iter().all(|r| *r == Resolution::Unchanged));
    assert_eq!(local_rows(store), first);
    assert!(first.iter().all(|row| !row.meta().needs_push));
}

#[tokio::test]
async fn cascade_delete_reaches_the_remote() {
    let (engine, remote, clock) = setup();
    engine.enable().await.unwrap();
    let store = engine.store();

    let project = store
        .create_item(NewItem::of_type("Project", "Move house"))
        .unwrap();
    let pack = store
        .create_item(NewItem::task("Pack books").under(&project.id))
        .unwrap();
    let boxes = store
        .create_item(NewItem::task("Buy boxes").under(&pack.id))
        .unwrap();
    let movers = store
        .create_item(NewItem::task("Book movers").under(&project.id))
        .unwrap();
    let tag = store.create_tag("weekend", None).unwrap();
    let link = store.tag_item(&pack.id, &tag.id).unwrap();
    let entry = store.start_time_entry(&boxes.id).unwrap();
    sync(&engine).await;
    assert_eq!(remote.live_record_count(), 7);

    clock.set(2_000);
    let tombstoned = SoftDeleteService::new()
        .delete_item(store, &project.id)
        .unwrap();
    // Project, its three descendants, one link and one time entry.
    assert_eq!(tombstoned, 6);
    for id in [&project.id, &pack.id, &boxes.id, &movers.id] {
        let row = item(store, id);
        assert_eq!(row.meta.deleted_at, Some(2_000));
        assert!(row.meta.needs_push);
    }

    let report = sync(&engine).await;
    assert_eq!(report.deleted, 6);
    for name in [&project.id, &pack.id, &boxes.id, &movers.id, &link.id, &entry.id] {
        assert!(remote.is_deleted(name), "{name} still live remotely");
    }
    assert!(remote.record(&tag.id).is_some());
    assert!(local_rows(store)
        .iter()
        .all(|row| !row.meta().needs_push));
}

#[tokio::test]
async fn expired_cursor_replaces_the_local_store() {
    let (engine, remote, _) = setup();
    engine.enable().await.unwrap();
    for name in ["a", "b", "c"] {
        remote.remote_put(tag_record(name, 500));
    }
    engine.store().create_item(NewItem::task("Local")).unwrap();
    sync(&engine).await;
    assert_eq!(local_rows(engine.store()).len(), 4);

    // A confirmed row the remote side never had.
    let stray = Row::Tag(Tag {
        id: "stray".into(),
        name: "stray".into(),
        color: None,
        created_at: 1,
        meta: SyncMeta {
            needs_push: false,
            ..SyncMeta::new_local("stray", 1)
        },
    });
    engine
        .store()
        .write(|tx| table::upsert(tx, &stray))
        .unwrap();
    remote.remote_put(tag_record("d", 600));
    remote.expire_cursors();

    let report = sync(&engine).await;
    assert!(report.full_resync);
    assert_eq!(engine.stats().full_resyncs, 2);

    let rows = local_rows(engine.store());
    assert_eq!(rows.len(), remote.live_record_count());
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|row| row.id() != "stray"));
}

#[tokio::test]
async fn large_push_is_chunked_to_the_service_limit() {
    let (engine, remote, _) = setup();
    engine.enable().await.unwrap();
    for i in 0..500 {
        engine
            .store()
            .create_tag(format!("tag {i}"), None)
            .unwrap();
    }

    let report = sync(&engine).await;
    assert_eq!(report.pushed, 500);
    assert_eq!(remote.submit_batch_sizes(), vec![400, 100]);
    assert_eq!(remote.live_record_count(), 500);
}

#[tokio::test]
async fn parents_reach_the_remote_before_children() {
    let (engine, remote, clock) = setup();
    engine.enable().await.unwrap();
    let store = engine.store();

    clock.set(2_000);
    let parent = store.create_item(NewItem::of_type("Folder", "Home")).unwrap();
    clock.set(1_500);
    let tag = store.create_tag("chores", None).unwrap();
    // Older than its parent, so it comes first in pending order.
    clock.set(1_000);
    let child = store
        .create_item(NewItem::task("Fix sink").under(&parent.id))
        .unwrap();
    let link = store.tag_item(&child.id, &tag.id).unwrap();
    sync(&engine).await;

    let feed = remote.fetch_changes(None).await.unwrap();
    let order: Vec<&str> = feed
        .records
        .iter()
        .map(|record| record.record_name.as_str())
        .collect();
    let position = |name: &str| order.iter().position(|n| *n == name).unwrap();
    assert!(position(&tag.id) < position(&child.id));
    assert!(position(&parent.id) < position(&child.id));
    assert!(position(&child.id) < position(&link.id));
}

#[tokio::test]
async fn remote_deletions_respect_newer_local_edits() {
    let (engine, remote, clock) = setup();
    engine.enable().await.unwrap();
    let store = engine.store();
    let gone = store.create_item(NewItem::task("Old idea")).unwrap();
    let kept = store.create_item(NewItem::task("Still relevant")).unwrap();
    sync(&engine).await;

    remote.remote_delete(RecordKind::Item, &gone.id, 2_000);
    let report = sync(&engine).await;
    assert_eq!(report.remote_deletions, 1);
    let tombstone = item(store, &gone.id);
    assert_eq!(tombstone.meta.deleted_at, Some(2_000));
    assert!(!tombstone.meta.needs_push);

    clock.set(3_000);
    rename(store, &kept.id, "Still relevant, edited");
    remote.remote_delete(RecordKind::Item, &kept.id, 2_500);

    let report = sync(&engine).await;
    assert_eq!(report.requeued, 1);
    assert_eq!(report.kept_local, 1);
    let survivor = item(store, &kept.id);
    assert!(survivor.meta.deleted_at.is_none());
    assert!(!survivor.meta.needs_push);
    let record = remote.record(&kept.id).unwrap();
    assert_eq!(record.text(fields::TITLE), Some("Still relevant, edited"));
}

#[tokio::test]
async fn malformed_and_unknown_records_are_skipped() {
    let (engine, remote, _) = setup();
    engine.enable().await.unwrap();

    let mut unknown = tag_record("attachment", 10);
    unknown.record_type = "Attachment".into();
    remote.remote_put(unknown);
    let mut untitled = RemoteRecord::new(RecordKind::Item, "untitled");
    untitled.set_int(fields::MODIFIED_AT, Some(10));
    remote.remote_put(untitled);
    remote.remote_put(tag_record("fine", 10));

    let report = sync(&engine).await;
    assert_eq!(report.skipped, 2);
    assert_eq!(report.pulled, 1);
    assert_eq!(engine.status().state, SyncState::Idle);
    assert!(engine
        .store()
        .get(RecordKind::Tag, "fine")
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn edit_made_during_push_survives() {
    let remote = Arc::new(InMemoryContainer::new("test"));
    let clock = ManualClock::new(1_000);
    let store = Arc::new(
        LocalStore::open_in_memory()
            .unwrap()
            .with_clock(clock.clock()),
    );
    let created = store.create_item(NewItem::task("original")).unwrap();
    let container = Arc::new(EditDuringSubmit {
        inner: remote.clone(),
        store: store.clone(),
        edit: Mutex::new(Some((created.id.clone(), "edited in flight".into()))),
    });
    let engine = SyncEngine::new(config(), store.clone(), container);
    engine.enable().await.unwrap();

    // Same second as the snapshot, so modified_at does not move.
    sync(&engine).await;
    let stored = item(&store, &created.id);
    assert_eq!(stored.title, "edited in flight");
    assert_eq!(stored.meta.modified_at, 1_000);
    assert!(stored.meta.needs_push);

    sync(&engine).await;
    let stored = item(&store, &created.id);
    assert_eq!(stored.title, "edited in flight");
    assert!(!stored.meta.needs_push);
    assert_eq!(
        remote.record(&created.id).unwrap().text(fields::TITLE),
        Some("edited in flight")
    );
}

#[tokio::test]
async fn conflict_with_mistyped_server_record_is_skipped() {
    let remote = Arc::new(InMemoryContainer::new("test"));
    let (engine, _) = device(Arc::new(MistypedConflicts { inner: remote }), 1_000);
    engine.enable().await.unwrap();
    let created = engine.store().create_item(NewItem::task("Draft")).unwrap();

    let report = sync(&engine).await;
    assert_eq!(report.skipped, 1);
    assert_eq!(report.accepted_remote, 0);
    assert_eq!(report.kept_local, 0);
    assert!(engine
        .store()
        .get(RecordKind::Tag, &created.id)
        .unwrap()
        .is_none());
    let stored = item(engine.store(), &created.id);
    assert_eq!(stored.title, "Draft");
    assert!(stored.meta.needs_push);
}

#[tokio::test]
async fn reparenting_under_a_descendant_is_rejected() {
    let (engine, remote, clock) = setup();
    engine.enable().await.unwrap();
    let store = engine.store();
    let parent = store
        .create_item(NewItem::of_type("Project", "Parent"))
        .unwrap();
    let child = store
        .create_item(NewItem::task("Child").under(&parent.id))
        .unwrap();
    sync(&engine).await;
    let confirmed = remote.record(&parent.id).unwrap().version_tag;

    clock.set(2_000);
    let mut moved = item(store, &parent.id);
    moved.parent_id = Some(child.id.clone());
    store.update_row(moved.into()).unwrap();

    let report = sync(&engine).await;
    assert_eq!(report.rejected, 1);
    assert_eq!(report.pushed, 0);
    assert!(item(store, &parent.id).meta.needs_push);
    assert_eq!(remote.record(&parent.id).unwrap().version_tag, confirmed);
}

#[tokio::test]
async fn interrupted_pull_resumes_from_last_applied_page() {
    let remote = Arc::new(InMemoryContainer::new("test").with_page_size(2));
    for i in 0..6 {
        remote.remote_put(tag_record(&format!("tag-{i}"), 10));
    }
    let container = Arc::new(FailingFetch {
        inner: remote.clone(),
        fail_on: 3,
        fetches: AtomicUsize::new(0),
    });
    let (engine, _) = device(container.clone(), 1_000);
    engine.enable().await.unwrap();

    assert!(matches!(
        engine.sync_now().await,
        Err(SyncError::NetworkFailure(_))
    ));
    assert_eq!(local_rows(engine.store()).len(), 4);
    let saved = engine.store().read(metadata::cursor).unwrap();
    assert!(saved.is_some());

    let report = sync(&engine).await;
    assert!(!report.full_resync);
    assert_eq!(report.pulled, 2);
    assert_eq!(container.fetches.load(Ordering::SeqCst), 4);
    assert_eq!(local_rows(engine.store()).len(), 6);
}

#[tokio::test]
async fn missing_container_is_recreated_without_losing_data() {
    let (engine, remote, _) = setup();
    engine.enable().await.unwrap();
    let store = engine.store();
    store.create_item(NewItem::task("One")).unwrap();
    store.create_tag("two", None).unwrap();
    sync(&engine).await;

    remote.delete_container();
    store.create_item(NewItem::task("Three")).unwrap();

    let report = sync(&engine).await;
    assert!(report.full_resync);
    assert_eq!(remote.live_record_count(), 3);
    let rows = local_rows(store);
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| !row.meta().needs_push));
}

#[tokio::test]
async fn two_devices_converge() {
    let remote = Arc::new(InMemoryContainer::new("shared"));
    let (phone, _) = device(remote.clone(), 1_000);
    let (laptop, laptop_clock) = device(remote.clone(), 1_000);
    phone.enable().await.unwrap();
    laptop.enable().await.unwrap();

    let task = phone
        .store()
        .create_item(NewItem::task("Renew passport"))
        .unwrap();
    let tag = phone.store().create_tag("errands", Some("#ff8800")).unwrap();
    let link = phone.store().tag_item(&task.id, &tag.id).unwrap();
    sync(&phone).await;

    let report = sync(&laptop).await;
    assert!(report.full_resync);
    assert_eq!(report.pulled, 3);
    assert_eq!(item(laptop.store(), &task.id).title, "Renew passport");

    laptop_clock.set(5_000);
    rename(laptop.store(), &task.id, "Renew passport before May");
    SoftDeleteService::new()
        .delete_tag(laptop.store(), &tag.id)
        .unwrap();
    sync(&laptop).await;

    let report = sync(&phone).await;
    assert_eq!(report.accepted_remote, 1);
    assert_eq!(report.remote_deletions, 2);
    assert_eq!(
        item(phone.store(), &task.id).title,
        "Renew passport before May"
    );
    for (kind, id) in [(RecordKind::Tag, &tag.id), (RecordKind::ItemTag, &link.id)] {
        let row = phone.store().get(kind, id).unwrap().unwrap();
        assert!(row.meta().is_deleted(), "{kind} {id} not deleted");
        assert!(!row.meta().needs_push);
    }
}

#[tokio::test]
async fn purge_removes_pushed_tombstones() {
    let (engine, _, clock) = setup();
    engine.enable().await.unwrap();
    let store = engine.store();
    let parent = store.create_item(NewItem::of_type("Folder", "Archive")).unwrap();
    let child = store
        .create_item(NewItem::task("Old note").under(&parent.id))
        .unwrap();
    sync(&engine).await;

    let service = SoftDeleteService::new().with_retention(Duration::from_secs(60));
    service.delete_item(store, &child.id).unwrap();

    // Not pushed yet.
    assert_eq!(service.purge(store, 10_000).unwrap().total(), 0);

    clock.set(1_100);
    sync(&engine).await;
    let report = service.purge(store, 10_000).unwrap();
    assert_eq!(report.items, 1);
    assert!(store.get(RecordKind::Item, &child.id).unwrap().is_none());
    assert!(store.get(RecordKind::Item, &parent.id).unwrap().is_some());
}

#[tokio::test]
async fn http_container_over_loopback() {
    let memory = Arc::new(InMemoryContainer::new("test"));
    let http = Arc::new(HttpContainer::new(
        "http://loopback",
        "test",
        LoopbackClient::new(memory.clone()),
    ));
    let (engine, _) = device(http, 1_000);
    engine.enable().await.unwrap();

    let created = engine
        .store()
        .create_item(NewItem::task("Over the wire"))
        .unwrap();
    let report = sync(&engine).await;
    assert_eq!(report.pushed, 1);
    assert_eq!(
        memory.record(&created.id).unwrap().text(fields::TITLE),
        Some("Over the wire")
    );

    memory.expire_cursors();
    let report = sync(&engine).await;
    assert!(report.full_resync);
    assert_eq!(local_rows(engine.store()).len(), 1);
}

#[tokio::test]
async fn unavailable_account_fails_the_cycle() {
    let (engine, remote, _) = setup();
    engine.enable().await.unwrap();
    remote.set_account_status(AccountStatus::NoAccount);

    let result = engine.sync_now().await;
    assert!(matches!(
        result,
        Err(SyncError::AccountUnavailable(AccountStatus::NoAccount))
    ));
    let status = engine.status();
    assert_eq!(status.state, SyncState::Error);
    assert!(status.last_error.is_some());

    remote.set_account_status(AccountStatus::Available);
    sync(&engine).await;
    assert_eq!(engine.status().state, SyncState::Idle);
}

#[tokio::test(start_paused = true)]
async fn unknown_errors_surface_then_retry_after_backoff() {
    let (engine, remote, _) = setup();
    engine.enable().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let tag = engine.store().create_tag("x", None).unwrap();
    remote.fail_next(FailOn::Submit, SyncError::Unknown("bad request".into()));
    assert!(engine.sync_now().await.is_err());
    let status = engine.status();
    assert_eq!(status.state, SyncState::Error);
    assert_eq!(status.last_error.as_deref(), Some("bad request"));
    assert_eq!(engine.stats().cycles_failed, 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.status().state, SyncState::Error);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(engine.status().state, SyncState::Idle);
    assert_eq!(engine.stats().retries, 1);
    assert!(remote.record(&tag.id).is_some());
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rapid_local_writes_coalesce_into_one_push() {
    let (engine, remote, _) = setup();
    engine.enable().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.stats().cycles_completed, 1);

    for i in 0..5 {
        engine
            .store()
            .create_item(NewItem::task(format!("task {i}")))
            .unwrap();
        engine.notify_local_change();
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(engine.stats().cycles_completed, 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(engine.stats().cycles_completed, 2);
    assert_eq!(remote.submit_batch_sizes(), vec![5]);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn network_failure_retries_with_backoff() {
    let (engine, remote, _) = setup();
    engine.enable().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let created = engine.store().create_item(NewItem::task("Retry me")).unwrap();
    remote.fail_next(FailOn::Submit, SyncError::NetworkFailure("offline".into()));
    engine.request_sync();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = engine.status();
    assert_eq!(status.state, SyncState::Idle);
    assert!(status.last_error.is_some());
    assert!(item(engine.store(), &created.id).meta.needs_push);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.stats().retries, 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(engine.stats().retries, 1);
    assert!(!item(engine.store(), &created.id).meta.needs_push);
    assert!(engine.status().last_error.is_none());
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn remote_notification_triggers_a_pull() {
    let (engine, remote, _) = setup();
    engine.enable().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    remote.remote_put(tag_record("from-elsewhere", 50));
    remote.notify_subscribers();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(engine
        .store()
        .get(RecordKind::Tag, "from-elsewhere")
        .unwrap()
        .is_some());
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_coalesce_into_one_follow_up() {
    let memory = Arc::new(InMemoryContainer::new("test"));
    let slow = Arc::new(SlowContainer {
        inner: memory.clone(),
        delay: Duration::from_millis(100),
    });
    let (engine, _) = device(slow, 1_000);
    engine.enable().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    let before = engine.stats();
    assert_eq!(before.cycles_completed, 1);

    let (first, second) = tokio::join!(engine.sync_now(), engine.sync_now());
    assert!(matches!(first.unwrap(), CycleOutcome::Completed(_)));
    assert_eq!(second.unwrap(), CycleOutcome::Coalesced);

    let after = engine.stats();
    assert_eq!(after.cycles_completed, before.cycles_completed + 2);
    assert_eq!(after.cycles_coalesced, before.cycles_coalesced + 1);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn initial_sync_reports_progress() {
    let memory = Arc::new(InMemoryContainer::new("test").with_page_size(2));
    for i in 0..5 {
        memory.remote_put(tag_record(&format!("tag-{i}"), 10));
    }
    let slow = Arc::new(SlowContainer {
        inner: memory.clone(),
        delay: Duration::from_millis(100),
    });
    let (engine, _) = device(slow, 1_000);
    engine.enable().await.unwrap();

    let observe = async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        engine.status()
    };
    let (outcome, during) = tokio::join!(engine.sync_now(), observe);
    assert!(matches!(outcome.unwrap(), CycleOutcome::Completed(_)));
    assert_eq!(during.state, SyncState::InitialSync);
    let progress = during.progress.unwrap();
    assert!(progress > 0 && progress < 100);

    let after = engine.status();
    assert_eq!(after.state, SyncState::Idle);
    assert_eq!(after.progress, None);
    assert_eq!(local_rows(engine.store()).len(), 5);
    engine.shutdown().await;
}

#[tokio::test]
async fn disabled_and_backgrounded_engines_stay_quiet() {
    let (engine, remote, _) = setup();
    engine.store().create_tag("x", None).unwrap();
    assert_eq!(engine.sync_now().await.unwrap(), CycleOutcome::Disabled);

    engine.enable().await.unwrap();
    engine.set_foreground(false);
    assert_eq!(engine.sync_now().await.unwrap(), CycleOutcome::Disabled);
    assert!(remote.submit_batch_sizes().is_empty());

    engine.disable();
    assert_eq!(engine.status().state, SyncState::Disabled);
    engine.shutdown().await;
}
