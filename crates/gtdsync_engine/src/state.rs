//! Sync state, status and cycle reports.

use std::time::{Duration, Instant};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Sync is off, or the engine has not been enabled yet.
    #[default]
    Disabled,
    /// Enabled and waiting for a trigger.
    Idle,
    /// Running an incremental cycle.
    Syncing,
    /// Running a full fetch-and-replace.
    InitialSync,
    /// The last cycle failed and will not be retried before the next trigger
    /// or the capped retry delay.
    Error,
}

impl SyncState {
    /// Returns true while a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Syncing | SyncState::InitialSync)
    }
}

/// Status published to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// Current state.
    pub state: SyncState,
    /// Unix seconds of the last successful cycle.
    pub last_sync_at: Option<i64>,
    /// Message of the last failure, cleared on success.
    pub last_error: Option<String>,
    /// Coarse 0-100 progress; only set during `InitialSync`.
    pub progress: Option<u8>,
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of failed cycles.
    pub cycles_failed: u64,
    /// Total number of triggers folded into a running cycle.
    pub cycles_coalesced: u64,
    /// Total number of full resyncs.
    pub full_resyncs: u64,
    /// Total number of records pushed (upserts and deletes).
    pub records_pushed: u64,
    /// Total number of records and deletions pulled.
    pub records_pulled: u64,
    /// Total number of conflicts resolved.
    pub conflicts_resolved: u64,
    /// Total number of retries.
    pub retries: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Upserts confirmed by the remote side.
    pub pushed: usize,
    /// Deletes confirmed by the remote side.
    pub deleted: usize,
    /// Remote records applied locally.
    pub pulled: usize,
    /// Remote deletions applied locally.
    pub remote_deletions: usize,
    /// Conflicts where the local row was kept and will be pushed again.
    pub kept_local: usize,
    /// Conflicts where the remote version replaced the local row.
    pub accepted_remote: usize,
    /// Rows refused by the service, or unpushable (dangling or cyclic).
    pub rejected: usize,
    /// Remote records skipped as malformed or of an unknown kind.
    pub skipped: usize,
    /// Rows the service no longer knew, queued for a fresh create.
    pub requeued: usize,
    /// Whether the pull replaced the local store from a full fetch.
    pub full_resync: bool,
    /// Duration of the cycle.
    pub duration: Duration,
}

impl CycleReport {
    /// Returns true if the cycle left rows that a follow-up push can settle.
    pub fn needs_follow_up(&self) -> bool {
        self.kept_local > 0 || self.requeued > 0
    }

    /// Adds the counts of a follow-up cycle.
    pub fn absorb(&mut self, other: CycleReport) {
        self.pushed += other.pushed;
        self.deleted += other.deleted;
        self.pulled += other.pulled;
        self.remote_deletions += other.remote_deletions;
        self.kept_local += other.kept_local;
        self.accepted_remote += other.accepted_remote;
        self.rejected += other.rejected;
        self.skipped += other.skipped;
        self.requeued += other.requeued;
        self.full_resync |= other.full_resync;
        self.duration += other.duration;
    }
}

/// What a sync request ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A cycle ran to completion.
    Completed(CycleReport),
    /// Another cycle was running; the request was folded into its follow-up.
    Coalesced,
    /// Sync is disabled or the engine is in the background.
    Disabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_states() {
        assert!(SyncState::Syncing.is_active());
        assert!(SyncState::InitialSync.is_active());
        assert!(!SyncState::Idle.is_active());
        assert!(!SyncState::Error.is_active());
        assert_eq!(SyncStatus::default().state, SyncState::Disabled);
    }

    #[test]
    fn absorb_merges_follow_up() {
        let mut report = CycleReport {
            pushed: 2,
            kept_local: 1,
            duration: Duration::from_millis(5),
            ..CycleReport::default()
        };
        assert!(report.needs_follow_up());

        report.absorb(CycleReport {
            pushed: 1,
            full_resync: true,
            duration: Duration::from_millis(3),
            ..CycleReport::default()
        });
        assert_eq!(report.pushed, 3);
        assert_eq!(report.kept_local, 1);
        assert!(report.full_resync);
        assert_eq!(report.duration, Duration::from_millis(8));
    }
}
