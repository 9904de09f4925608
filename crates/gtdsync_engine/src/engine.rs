//! The sync engine: triggers, single-flight cycles and retry scheduling.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::pull::{self, PullMode};
use crate::push;
use crate::remote::RemoteContainer;
use crate::state::{CycleOutcome, CycleReport, SyncState, SyncStats, SyncStatus};
use gtdsync_records::ChangeNotification;
use gtdsync_store::{metadata, reconcile, LocalStore};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    LocalChange,
    SyncNow,
    Reschedule,
    Shutdown,
}

/// Replicates a [`LocalStore`] with a remote container.
///
/// The engine is owned by the caller. Once [`enable`](Self::enable)d it runs
/// a background driver task that turns triggers (local writes, a periodic
/// timer, remote notifications, explicit requests and retry deadlines) into
/// sync cycles. At most one cycle runs at a time; triggers that arrive while
/// a cycle is running are folded into a single follow-up cycle.
///
/// Disabling, backgrounding or shutting down never interrupts a running
/// cycle; it only stops new ones from being scheduled.
pub struct SyncEngine<R: RemoteContainer> {
    inner: Arc<EngineInner<R>>,
}

struct EngineInner<R: RemoteContainer> {
    config: SyncConfig,
    store: Arc<LocalStore>,
    remote: Arc<R>,
    status: watch::Sender<SyncStatus>,
    stats: RwLock<SyncStats>,
    cycle_lock: tokio::sync::Mutex<()>,
    follow_up: AtomicBool,
    enabled: AtomicBool,
    foreground: AtomicBool,
    container_ready: AtomicBool,
    failures: AtomicU32,
    retry_at: Mutex<Option<Instant>>,
    triggers: mpsc::UnboundedSender<Trigger>,
    trigger_rx: Mutex<Option<mpsc::UnboundedReceiver<Trigger>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<R: RemoteContainer> SyncEngine<R> {
    /// Creates a disabled engine.
    pub fn new(config: SyncConfig, store: Arc<LocalStore>, remote: Arc<R>) -> Self {
        let last_sync_at = store
            .metadata()
            .ok()
            .and_then(|metadata| metadata.last_sync_at);
        let (status, _) = watch::channel(SyncStatus {
            last_sync_at,
            ..SyncStatus::default()
        });
        let (triggers, trigger_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                remote,
                status,
                stats: RwLock::new(SyncStats::default()),
                cycle_lock: tokio::sync::Mutex::new(()),
                follow_up: AtomicBool::new(false),
                enabled: AtomicBool::new(false),
                foreground: AtomicBool::new(true),
                container_ready: AtomicBool::new(false),
                failures: AtomicU32::new(0),
                retry_at: Mutex::new(None),
                triggers,
                trigger_rx: Mutex::new(Some(trigger_rx)),
                driver: Mutex::new(None),
            }),
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// The local store being replicated.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.inner.store
    }

    /// The remote container.
    pub fn remote(&self) -> &Arc<R> {
        &self.inner.remote
    }

    /// Enables sync and starts the background driver.
    ///
    /// Must be called inside a Tokio runtime. If the account is unavailable
    /// the engine enters `Error` and re-checks at the capped retry delay.
    pub async fn enable(&self) -> SyncResult<()> {
        let inner = &self.inner;
        inner.enabled.store(true, Ordering::SeqCst);
        self.spawn_driver();

        let status = match inner.remote.account_status().await {
            Ok(status) => status,
            Err(error) => {
                inner.on_failure(&error);
                return Err(error);
            }
        };
        if !status.is_available() {
            let error = SyncError::AccountUnavailable(status);
            inner.on_failure(&error);
            return Err(error);
        }

        info!(container = %inner.config.container_id, "sync enabled");
        inner.set_state(SyncState::Idle);
        self.request_sync();
        Ok(())
    }

    /// Disables sync. A running cycle finishes; no new ones start.
    pub fn disable(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
        *self.inner.retry_at.lock() = None;
        if !self.status().state.is_active() {
            self.inner.set_state(SyncState::Disabled);
        }
        info!("sync disabled");
    }

    /// Reports whether the application is in the foreground.
    ///
    /// Cycles only run in the foreground; returning to it requests a sync.
    pub fn set_foreground(&self, foreground: bool) {
        let was = self.inner.foreground.swap(foreground, Ordering::SeqCst);
        if foreground && !was {
            debug!("entered foreground");
            self.request_sync();
        }
    }

    /// Stops the driver after any running cycle finishes.
    pub async fn shutdown(&self) {
        self.disable();
        let _ = self.inner.triggers.send(Trigger::Shutdown);
        let handle = self.inner.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                warn!(%error, "sync driver ended abnormally");
            }
        }
    }

    /// Signals a local write. Rapid writes within the debounce window
    /// coalesce into one sync.
    pub fn notify_local_change(&self) {
        let _ = self.inner.triggers.send(Trigger::LocalChange);
    }

    /// Asks the driver to sync as soon as possible.
    pub fn request_sync(&self) {
        let _ = self.inner.triggers.send(Trigger::SyncNow);
    }

    /// Runs a cycle now and waits for it.
    ///
    /// Returns [`CycleOutcome::Coalesced`] if a cycle is already running;
    /// that cycle then runs one follow-up.
    pub async fn sync_now(&self) -> SyncResult<CycleOutcome> {
        self.inner.run().await
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    /// Subscribes to status changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Accumulated statistics.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    fn spawn_driver(&self) {
        let Some(triggers) = self.inner.trigger_rx.lock().take() else {
            return;
        };
        let notifications = self.inner.remote.register_for_change_notifications();
        let handle = tokio::spawn(drive(Arc::clone(&self.inner), triggers, notifications));
        *self.inner.driver.lock() = Some(handle);
    }
}

impl<R: RemoteContainer> Drop for SyncEngine<R> {
    fn drop(&mut self) {
        let _ = self.inner.triggers.send(Trigger::Shutdown);
    }
}

impl<R: RemoteContainer> std::fmt::Debug for SyncEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("container", &self.inner.config.container_id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

async fn drive<R: RemoteContainer>(
    inner: Arc<EngineInner<R>>,
    mut triggers: mpsc::UnboundedReceiver<Trigger>,
    notifications: broadcast::Receiver<ChangeNotification>,
) {
    let mut notifications = Some(notifications);
    let period = inner.config.periodic_interval.max(Duration::from_secs(1));
    let mut periodic = tokio::time::interval_at(Instant::now() + period, period);
    periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut debounce_at: Option<Instant> = None;

    debug!("sync driver started");
    loop {
        let retry_at = *inner.retry_at.lock();
        tokio::select! {
            trigger = triggers.recv() => match trigger {
                None | Some(Trigger::Shutdown) => break,
                Some(Trigger::LocalChange) => {
                    if debounce_at.is_none() {
                        debounce_at = Some(Instant::now() + inner.config.debounce);
                    }
                }
                Some(Trigger::SyncNow) => {
                    debounce_at = None;
                    inner.run_triggered().await;
                }
                Some(Trigger::Reschedule) => {}
            },
            _ = sleep_until(debounce_at) => {
                debounce_at = None;
                inner.run_triggered().await;
            }
            _ = sleep_until(retry_at) => {
                *inner.retry_at.lock() = None;
                inner.stats.write().retries += 1;
                inner.run_triggered().await;
            }
            _ = periodic.tick() => inner.run_scheduled().await,
            _ = remote_changed(&mut notifications) => {
                debug!("remote change notification");
                inner.run_scheduled().await;
            }
        }
    }
    debug!("sync driver stopped");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn remote_changed(notifications: &mut Option<broadcast::Receiver<ChangeNotification>>) {
    loop {
        let Some(receiver) = notifications.as_mut() else {
            return std::future::pending().await;
        };
        match receiver.recv().await {
            Ok(_) => return,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "change notifications lagged");
                return;
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("change notifications closed");
                *notifications = None;
            }
        }
    }
}

impl<R: RemoteContainer> EngineInner<R> {
    fn is_active(&self) -> bool {
        self.enabled.load(Ordering::SeqCst) && self.foreground.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: SyncState) {
        self.status.send_modify(|status| {
            status.state = state;
            if state != SyncState::InitialSync {
                status.progress = None;
            }
        });
    }

    fn resting_state(&self, state: SyncState) -> SyncState {
        if self.enabled.load(Ordering::SeqCst) {
            state
        } else {
            SyncState::Disabled
        }
    }

    /// Runs a cycle for a local write, explicit request or retry deadline.
    async fn run_triggered(&self) {
        let _ = self.run().await;
    }

    /// Runs a cycle for the periodic timer or a remote notification.
    ///
    /// Skipped while in `Error`; those states recover through their retry
    /// deadline or an explicit trigger.
    async fn run_scheduled(&self) {
        let state = self.status.borrow().state;
        if state == SyncState::Error {
            debug!("skipping scheduled sync while in error");
            return;
        }
        let _ = self.run().await;
    }

    async fn run(&self) -> SyncResult<CycleOutcome> {
        if !self.is_active() {
            return Ok(CycleOutcome::Disabled);
        }
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            self.follow_up.store(true, Ordering::SeqCst);
            self.stats.write().cycles_coalesced += 1;
            debug!("sync already running, coalescing");
            return Ok(CycleOutcome::Coalesced);
        };

        let mut total: Option<CycleReport> = None;
        let mut local_follow_up_done = false;
        loop {
            self.follow_up.store(false, Ordering::SeqCst);
            let result = match self.cycle().await {
                Ok(report) => self.on_success(&report).map(|()| report),
                Err(error) => Err(error),
            };
            let report = match result {
                Ok(report) => report,
                Err(error) => {
                    self.on_failure(&error);
                    return Err(error);
                }
            };

            let local = report.needs_follow_up() && !local_follow_up_done;
            local_follow_up_done |= local;
            match total.as_mut() {
                Some(total) => total.absorb(report),
                None => total = Some(report),
            }

            let coalesced = self.follow_up.swap(false, Ordering::SeqCst);
            if !(local || coalesced) || !self.is_active() {
                break;
            }
            debug!(local, coalesced, "running follow-up cycle");
        }
        Ok(CycleOutcome::Completed(total.unwrap_or_default()))
    }

    async fn cycle(&self) -> SyncResult<CycleReport> {
        let started = std::time::Instant::now();

        let account = self.remote.account_status().await?;
        if !account.is_available() {
            return Err(SyncError::AccountUnavailable(account));
        }
        if !self.container_ready.load(Ordering::SeqCst) {
            self.remote.ensure_container_exists().await?;
            self.container_ready.store(true, Ordering::SeqCst);
        }

        let mut report = CycleReport::default();
        let mode = match self.store.read(metadata::cursor)? {
            Some(_) => PullMode::Incremental,
            None => PullMode::Full,
        };
        self.set_state(match mode {
            PullMode::Incremental => SyncState::Syncing,
            PullMode::Full => SyncState::InitialSync,
        });

        match self.push_then_pull(mode, &mut report).await {
            Ok(()) => {}
            Err(SyncError::CursorExpired) => {
                warn!("change cursor expired, running full resync");
                self.set_state(SyncState::InitialSync);
                self.pull(PullMode::Full, &mut report).await?;
            }
            Err(SyncError::ContainerMissing) => {
                warn!(container = %self.config.container_id, "remote container missing, recreating");
                self.remote.ensure_container_exists().await?;
                let requeued = self.store.write(|tx| {
                    let requeued = reconcile::requeue_all(tx)?;
                    metadata::clear_cursor(tx)?;
                    Ok(requeued)
                })?;
                info!(requeued, "queued local rows for upload to recreated container");
                self.set_state(SyncState::InitialSync);
                self.push_then_pull(PullMode::Full, &mut report).await?;
            }
            Err(error) => return Err(error),
        }

        report.duration = started.elapsed();
        Ok(report)
    }

    async fn push_then_pull(&self, mode: PullMode, report: &mut CycleReport) -> SyncResult<()> {
        push::push(
            &self.store,
            self.remote.as_ref(),
            self.config.push_batch_limit,
            report,
        )
        .await?;
        self.pull(mode, report).await
    }

    async fn pull(&self, mode: PullMode, report: &mut CycleReport) -> SyncResult<()> {
        pull::pull(&self.store, self.remote.as_ref(), mode, report, |percent| {
            self.status
                .send_modify(|status| status.progress = Some(percent));
        })
        .await
    }

    fn on_success(&self, report: &CycleReport) -> SyncResult<()> {
        let now = self.store.clock().now();
        self.store
            .write(|tx| metadata::set_last_sync_at(tx, now))?;

        self.failures.store(0, Ordering::SeqCst);
        *self.retry_at.lock() = None;
        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.records_pushed += (report.pushed + report.deleted) as u64;
            stats.records_pulled += (report.pulled + report.remote_deletions) as u64;
            stats.conflicts_resolved += (report.kept_local + report.accepted_remote) as u64;
            stats.full_resyncs += u64::from(report.full_resync);
            stats.last_sync_time = Some(std::time::Instant::now());
            stats.last_error = None;
        }

        let state = self.resting_state(SyncState::Idle);
        self.status.send_modify(|status| {
            status.state = state;
            status.last_sync_at = Some(now);
            status.last_error = None;
            status.progress = None;
        });
        info!(
            pushed = report.pushed,
            deleted = report.deleted,
            pulled = report.pulled,
            remote_deletions = report.remote_deletions,
            kept_local = report.kept_local,
            rejected = report.rejected,
            full_resync = report.full_resync,
            "sync cycle complete"
        );
        Ok(())
    }

    fn on_failure(&self, failure: &SyncError) {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        let retry = &self.config.retry;
        let exhausted = failures >= retry.max_attempts;

        let backoff = if exhausted {
            retry.max_delay
        } else {
            retry.delay_for_attempt(failures)
        };

        let (state, delay) = if failure.is_retryable() {
            let delay = failure
                .retry_after()
                .map_or(backoff, |hint| hint.max(backoff));
            let state = if exhausted {
                SyncState::Error
            } else {
                SyncState::Idle
            };
            (state, delay)
        } else if matches!(failure, SyncError::AccountUnavailable(_)) {
            (SyncState::Error, retry.max_delay)
        } else {
            (SyncState::Error, backoff)
        };
        let delay = Some(delay).filter(|delay| !delay.is_zero());

        if state == SyncState::Error {
            error!(%failure, failures, retry_in = ?delay, "sync failed");
        } else {
            warn!(%failure, failures, retry_in = ?delay, "sync failed, will retry");
        }

        *self.retry_at.lock() = if self.enabled.load(Ordering::SeqCst) {
            delay.map(|delay| Instant::now() + delay)
        } else {
            None
        };
        let _ = self.triggers.send(Trigger::Reschedule);

        {
            let mut stats = self.stats.write();
            stats.cycles_failed += 1;
            stats.last_error = Some(failure.to_string());
        }
        let state = self.resting_state(state);
        let message = failure.to_string();
        self.status.send_modify(|status| {
            status.state = state;
            status.last_error = Some(message);
            status.progress = None;
        });
    }
}
