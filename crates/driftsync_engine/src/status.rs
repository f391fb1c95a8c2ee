//! Observable sync status owned by the scheduler.

use crate::conditions::Trigger;
use crate::error::SyncError;
use crate::progress::SyncProgress;
use driftsync_protocol::{OwnerId, Timestamp};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// A job that exhausted its retries or hit a non-retryable error.
#[derive(Debug, Clone)]
pub struct SyncFailure {
    /// Owner whose job failed.
    pub owner: OwnerId,
    /// What started the job.
    pub trigger: Trigger,
    /// Attempts made.
    pub attempts: u32,
    /// The final error.
    pub error: Arc<SyncError>,
    /// When the job gave up.
    pub failed_at: Timestamp,
}

/// Job counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Requests that started a job.
    pub accepted: u64,
    /// Requests absorbed by a job already in flight.
    pub coalesced: u64,
    /// Jobs that completed.
    pub completed: u64,
    /// Jobs that failed terminally.
    pub failed: u64,
    /// Periodic jobs skipped for unmet preconditions.
    pub skipped: u64,
    /// Sync attempts started, retries included.
    pub attempts: u64,
}

/// Process-wide sync state.
///
/// Created with the scheduler and shared with every manager handle. The
/// syncing flag is true from job acceptance until the last in-flight job
/// ends.
#[derive(Debug)]
pub struct SyncStatus {
    syncing: watch::Sender<bool>,
    progress: watch::Sender<Option<SyncProgress>>,
    failure: Mutex<Option<SyncFailure>>,
    accepted: AtomicU64,
    coalesced: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    attempts: AtomicU64,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStatus {
    /// Creates an idle status.
    pub fn new() -> Self {
        let (syncing, _) = watch::channel(false);
        let (progress, _) = watch::channel(None);
        Self {
            syncing,
            progress,
            failure: Mutex::new(None),
            accepted: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
        }
    }

    /// Returns true while any job is in flight.
    pub fn is_syncing(&self) -> bool {
        *self.syncing.borrow()
    }

    /// Subscribes to the syncing flag.
    pub fn watch_syncing(&self) -> watch::Receiver<bool> {
        self.syncing.subscribe()
    }

    /// Subscribes to progress ticks. `None` between jobs.
    pub fn watch_progress(&self) -> watch::Receiver<Option<SyncProgress>> {
        self.progress.subscribe()
    }

    /// Takes the last terminal failure, leaving none behind.
    pub fn take_failure(&self) -> Option<SyncFailure> {
        self.failure.lock().take()
    }

    /// Returns the job counters.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            accepted: self.accepted.load(Ordering::SeqCst),
            coalesced: self.coalesced.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            attempts: self.attempts.load(Ordering::SeqCst),
        }
    }

    pub(crate) fn set_syncing(&self, syncing: bool) {
        self.syncing.send_if_modified(|current| {
            let changed = *current != syncing;
            *current = syncing;
            changed
        });
        if !syncing {
            self.progress.send_replace(None);
        }
    }

    pub(crate) fn publish_progress(&self, progress: SyncProgress) {
        self.progress.send_replace(Some(progress));
    }

    pub(crate) fn record_failure(&self, failure: SyncFailure) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        *self.failure.lock() = Some(failure);
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }
}
