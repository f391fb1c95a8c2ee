//! Progress, state and statistics of sync runs.

use driftsync_protocol::{Conflict, Timestamp};
use std::fmt;

/// Phase a progress tick belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    /// Applying remote records locally.
    Pull,
    /// Sending local changes to the remote.
    Push,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Pull => f.write_str("pull"),
            SyncPhase::Push => f.write_str("push"),
        }
    }
}

/// A transient progress tick. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncProgress {
    /// Phase of the tick.
    pub phase: SyncPhase,
    /// Number of records in this phase.
    pub total: usize,
    /// Records processed so far in this phase, 1-based.
    pub current: usize,
    /// Optional human-readable detail.
    pub message: Option<String>,
}

impl SyncProgress {
    /// Creates a tick.
    pub fn new(phase: SyncPhase, total: usize, current: usize) -> Self {
        Self {
            phase,
            total,
            current,
            message: None,
        }
    }

    /// Attaches a message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Returns true for the last tick of its phase.
    pub fn is_phase_complete(&self) -> bool {
        self.current >= self.total
    }
}

/// State of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// No run has started, or the last one was abandoned before pulling.
    Idle,
    /// Pull phase in progress.
    Pulling,
    /// Push phase in progress.
    Pushing,
    /// The last run finished.
    Completed,
    /// The last run stopped on an error.
    Failed,
}

impl SyncState {
    /// Returns true while a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Pulling | SyncState::Pushing)
    }

    /// Returns true once a run has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Completed | SyncState::Failed)
    }
}

/// Summary of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote records written locally.
    pub pulled: usize,
    /// Local changes confirmed by the remote.
    pub pushed: usize,
    /// Pulled records skipped as malformed or foreign.
    pub skipped: usize,
    /// Records re-queued because an earlier confirmation was lost.
    pub requeued: usize,
    /// Pulled records that met a pending local change.
    pub conflicts: Vec<Conflict>,
}

impl SyncReport {
    /// Returns true if the run moved nothing in either direction.
    pub fn is_noop(&self) -> bool {
        self.pulled == 0 && self.pushed == 0 && self.skipped == 0
    }
}

/// Cumulative statistics of an orchestrator.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Runs that completed.
    pub runs_completed: u64,
    /// Runs that failed.
    pub runs_failed: u64,
    /// Records pulled.
    pub records_pulled: u64,
    /// Records pushed.
    pub records_pushed: u64,
    /// Pulled records skipped.
    pub records_skipped: u64,
    /// Conflicts encountered.
    pub conflicts: u64,
    /// Confirmed deletes purged.
    pub tombstones_purged: u64,
    /// Time of the last completed run.
    pub last_completed_at: Option<Timestamp>,
    /// Last error message.
    pub last_error: Option<String>,
}
