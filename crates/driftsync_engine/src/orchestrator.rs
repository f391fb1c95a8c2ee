//! The sync orchestrator: pull, reconcile, push.
//!
//! A run is a lazy iterator. Nothing happens until the first `next()`, and
//! each `next()` does exactly the work behind one progress tick:
//!
//! 1. **Pull.** `since = latest_modified_at(owner)`, then `remote.pull`. Each
//!    pulled record is reconciled with last-writer-wins against the current
//!    local copy and yields one tick. An accepted remote copy is written only
//!    if the local copy did not change since it was read.
//! 2. **Push.** Records whose confirmation was lost are re-queued, then every
//!    pending record is sent oldest first with `remote.upsert` (deletes
//!    included; the soft-delete flag travels in the record). Each confirmed
//!    record is marked synced before the next is sent and yields one tick. A
//!    record edited while its push was in flight stays pending.
//! 3. The iterator ends after the last push tick, or yields the first error
//!    and ends.
//!
//! A failed run leaves no partial state to resume: the next run starts over
//! with a fresh pull.

use crate::cancel::CancelToken;
use crate::error::{SyncError, SyncResult};
use crate::progress::{SyncPhase, SyncProgress, SyncReport, SyncState, SyncStats};
use crate::remote::{PulledRecord, RemoteStore};
use driftsync_protocol::{
    resolve, Clock, Conflict, ConflictResolution, OwnerId, RecordId, SyncableRecord, SystemClock,
    Timestamp,
};
use driftsync_store::LocalStore;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

/// Drives sync runs between one local and one remote store.
pub struct SyncOrchestrator<L: LocalStore, R: RemoteStore> {
    local: Arc<L>,
    remote: Arc<R>,
    clock: Arc<dyn Clock>,
    state: Arc<RwLock<SyncState>>,
    stats: Arc<RwLock<SyncStats>>,
}

impl<L: LocalStore, R: RemoteStore> Clone for SyncOrchestrator<L, R> {
    fn clone(&self) -> Self {
        Self {
            local: Arc::clone(&self.local),
            remote: Arc::clone(&self.remote),
            clock: Arc::clone(&self.clock),
            state: Arc::clone(&self.state),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<L: LocalStore, R: RemoteStore> SyncOrchestrator<L, R> {
    /// Creates an orchestrator using the system clock.
    pub fn new(local: Arc<L>, remote: Arc<R>) -> Self {
        Self {
            local,
            remote,
            clock: Arc::new(SystemClock),
            state: Arc::new(RwLock::new(SyncState::Idle)),
            stats: Arc::new(RwLock::new(SyncStats::default())),
        }
    }

    /// Replaces the clock used for sync timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the cumulative stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the local store.
    pub fn local(&self) -> &Arc<L> {
        &self.local
    }

    /// Returns the remote store.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Opens a run for `owner`.
    ///
    /// The run does nothing until iterated.
    pub fn sync(&self, owner: &OwnerId) -> SyncRun<L, R> {
        self.sync_with_cancel(owner, CancelToken::new())
    }

    /// Opens a run for `owner` that stops when `cancel` fires.
    pub fn sync_with_cancel(&self, owner: &OwnerId, cancel: CancelToken) -> SyncRun<L, R> {
        SyncRun {
            orchestrator: self.clone(),
            owner: owner.clone(),
            cancel,
            stage: Stage::Start,
            report: SyncReport::default(),
            started: Instant::now(),
        }
    }

    /// Runs a full sync and returns its report.
    ///
    /// # Errors
    ///
    /// Returns the first error the run yields.
    pub fn sync_to_completion(&self, owner: &OwnerId) -> SyncResult<SyncReport> {
        let mut run = self.sync(owner);
        for tick in run.by_ref() {
            tick?;
        }
        Ok(run.into_report())
    }

    /// Hard-deletes confirmed soft deletes of `owner` synced before
    /// `older_than`, remotely first, then locally.
    ///
    /// Returns the number of purged records. Stops at the first failure;
    /// records purged so far stay purged.
    pub fn purge_confirmed_deletes(&self, owner: &OwnerId, older_than: Timestamp) -> SyncResult<usize> {
        let candidates: Vec<RecordId> = self
            .local
            .list_for_owner(owner)?
            .into_iter()
            .filter(|r| r.is_purgeable() && r.last_synced_at < older_than)
            .map(|r| r.id)
            .collect();

        let mut purged = 0;
        for id in candidates {
            self.remote.delete(&id)?;
            self.local.purge(&id)?;
            purged += 1;
            tracing::debug!(owner = %owner, record = %id, "purged tombstone");
        }
        if purged > 0 {
            self.stats.write().tombstones_purged += purged as u64;
            tracing::info!(owner = %owner, purged, "purged confirmed deletes");
        }
        Ok(purged)
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }
}

enum Stage {
    Start,
    Pulling {
        batch: std::vec::IntoIter<PulledRecord>,
        total: usize,
        current: usize,
    },
    StartPush,
    Pushing {
        pending: std::vec::IntoIter<SyncableRecord>,
        total: usize,
        current: usize,
    },
    Done,
}

/// A single sync run: a finite, non-restartable stream of progress ticks.
///
/// Yields `Ok(tick)` per processed record and, on failure, one final `Err`.
/// Once it returns `None` it keeps returning `None`.
pub struct SyncRun<L: LocalStore, R: RemoteStore> {
    orchestrator: SyncOrchestrator<L, R>,
    owner: OwnerId,
    cancel: CancelToken,
    stage: Stage,
    report: SyncReport,
    started: Instant,
}

impl<L: LocalStore, R: RemoteStore> SyncRun<L, R> {
    /// Returns the owner being synced.
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Returns the report so far.
    pub fn report(&self) -> &SyncReport {
        &self.report
    }

    /// Consumes the run and returns its report.
    pub fn into_report(self) -> SyncReport {
        self.report
    }

    /// Returns true once the run has ended.
    pub fn is_finished(&self) -> bool {
        matches!(self.stage, Stage::Done)
    }

    fn step(&mut self) -> SyncResult<Option<SyncProgress>> {
        loop {
            match &mut self.stage {
                Stage::Start => self.begin_pull()?,
                Stage::Pulling {
                    batch,
                    total,
                    current,
                } => {
                    let Some(item) = batch.next() else {
                        self.stage = Stage::StartPush;
                        continue;
                    };
                    self.cancel.check()?;
                    *current += 1;
                    let tick = SyncProgress::new(SyncPhase::Pull, *total, *current);
                    let message = apply_pulled(
                        self.orchestrator.local.as_ref(),
                        &self.owner,
                        item,
                        &mut self.report,
                    )?;
                    return Ok(Some(tick.with_message(message)));
                }
                Stage::StartPush => self.begin_push()?,
                Stage::Pushing {
                    pending,
                    total,
                    current,
                } => {
                    let Some(record) = pending.next() else {
                        self.finish();
                        return Ok(None);
                    };
                    self.cancel.check()?;

                    let orchestrator = &self.orchestrator;
                    orchestrator.remote.upsert(&record)?;
                    let synced_at = orchestrator.clock.now().max(record.last_modified_at);
                    let confirmed = orchestrator.local.mark_synced(
                        &record.id,
                        record.last_modified_at,
                        synced_at,
                    )?;
                    if !confirmed {
                        tracing::debug!(
                            owner = %self.owner,
                            record = %record.id,
                            "record changed during push, keeping it pending"
                        );
                    }

                    *current += 1;
                    self.report.pushed += 1;
                    tracing::debug!(
                        owner = %self.owner,
                        record = %record.id,
                        deleted = record.deleted,
                        "pushed record"
                    );
                    return Ok(Some(
                        SyncProgress::new(SyncPhase::Push, *total, *current)
                            .with_message(record.id.to_string()),
                    ));
                }
                Stage::Done => return Ok(None),
            }
        }
    }

    fn begin_pull(&mut self) -> SyncResult<()> {
        self.cancel.check()?;
        self.orchestrator.set_state(SyncState::Pulling);

        let local = &self.orchestrator.local;
        let since = local.latest_modified_at(&self.owner)?;
        let batch = self.orchestrator.remote.pull(&self.owner, since)?;

        tracing::debug!(owner = %self.owner, since, batch = batch.len(), "pulled batch");
        self.stage = Stage::Pulling {
            total: batch.len(),
            batch: batch.into_iter(),
            current: 0,
        };
        Ok(())
    }

    fn begin_push(&mut self) -> SyncResult<()> {
        self.cancel.check()?;
        self.orchestrator.set_state(SyncState::Pushing);

        let local = &self.orchestrator.local;
        for mut record in local.list_for_owner(&self.owner)? {
            if record.requeue_if_unconfirmed() {
                tracing::warn!(
                    owner = %self.owner,
                    record = %record.id,
                    modified_at = record.last_modified_at,
                    synced_at = record.last_synced_at,
                    "re-queueing unconfirmed change"
                );
                // a concurrent edit already made it pending
                let modified_at = record.last_modified_at;
                if local.upsert_if_unchanged(record, Some(modified_at))? {
                    self.report.requeued += 1;
                }
            }
        }

        let mut pending = local.list_pending(&self.owner)?;
        pending.sort_by(|a, b| {
            a.last_modified_at
                .cmp(&b.last_modified_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        tracing::debug!(owner = %self.owner, pending = pending.len(), "pushing");
        self.stage = Stage::Pushing {
            total: pending.len(),
            pending: pending.into_iter(),
            current: 0,
        };
        Ok(())
    }

    fn finish(&mut self) {
        self.stage = Stage::Done;
        self.orchestrator.set_state(SyncState::Completed);

        let now = self.orchestrator.clock.now();
        {
            let mut stats = self.orchestrator.stats.write();
            stats.runs_completed += 1;
            stats.records_pulled += self.report.pulled as u64;
            stats.records_pushed += self.report.pushed as u64;
            stats.records_skipped += self.report.skipped as u64;
            stats.conflicts += self.report.conflicts.len() as u64;
            stats.last_completed_at = Some(now);
            stats.last_error = None;
        }
        tracing::info!(
            owner = %self.owner,
            pulled = self.report.pulled,
            pushed = self.report.pushed,
            skipped = self.report.skipped,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "sync completed"
        );
    }

    fn fail(&mut self, error: &SyncError) {
        self.stage = Stage::Done;
        self.orchestrator.set_state(SyncState::Failed);
        {
            let mut stats = self.orchestrator.stats.write();
            stats.runs_failed += 1;
            stats.last_error = Some(error.to_string());
        }
        tracing::warn!(owner = %self.owner, error = %error, "sync failed");
    }
}

/// Attempts to apply one pulled record before giving up on a local copy that
/// keeps changing underneath.
const APPLY_ATTEMPTS: usize = 3;

/// Reconciles one pulled record. Returns the tick message.
fn apply_pulled<L: LocalStore + ?Sized>(
    local: &L,
    owner: &OwnerId,
    item: PulledRecord,
    report: &mut SyncReport,
) -> SyncResult<String> {
    let remote = match item {
        Ok(remote) => remote,
        Err(malformed) => {
            tracing::warn!(owner = %owner, error = %malformed, "skipping malformed record");
            report.skipped += 1;
            return Ok(format!("skipped: {}", malformed.reason));
        }
    };
    if &remote.owner_id != owner || remote.id.as_str().is_empty() {
        tracing::warn!(
            owner = %owner,
            record = %remote.id,
            record_owner = %remote.owner_id,
            "skipping record outside the owner partition"
        );
        report.skipped += 1;
        return Ok(format!("skipped: {}", remote.id));
    }

    let message = remote.id.to_string();
    for _ in 0..APPLY_ATTEMPTS {
        let existing = local.get(&remote.id)?;
        let resolution = resolve(existing.as_ref(), &remote);
        match resolution {
            ConflictResolution::AcceptRemote => {
                let expected = existing.as_ref().map(|r| r.last_modified_at);
                if !local.upsert_if_unchanged(remote.clone().accept_remote(), expected)? {
                    tracing::debug!(owner = %owner, record = %remote.id, "local copy changed, re-reading");
                    continue;
                }
                report.pulled += 1;
            }
            ConflictResolution::KeepLocal => {
                tracing::debug!(owner = %owner, record = %remote.id, "kept pending local change");
            }
        }
        if let Some(conflict) = Conflict::detect(existing.as_ref(), &remote, resolution) {
            tracing::info!(
                owner = %owner,
                record = %remote.id,
                local_modified_at = conflict.local_modified_at,
                remote_modified_at = conflict.remote_modified_at,
                resolution = ?conflict.resolution,
                "conflict resolved"
            );
            report.conflicts.push(conflict);
        }
        return Ok(message);
    }

    // every attempt lost to a local write, which is pending and gets pushed
    tracing::warn!(owner = %owner, record = %remote.id, "local copy kept changing, keeping it");
    Ok(message)
}

impl<L: LocalStore, R: RemoteStore> Iterator for SyncRun<L, R> {
    type Item = SyncResult<SyncProgress>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(tick)) => Some(Ok(tick)),
            Ok(None) => None,
            Err(e) => {
                self.fail(&e);
                Some(Err(e))
            }
        }
    }
}

impl<L: LocalStore, R: RemoteStore> std::iter::FusedIterator for SyncRun<L, R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;
    use driftsync_protocol::{ManualClock, PendingAction};
    use driftsync_store::{LocalWrites, MemoryLocalStore};

    fn setup() -> (
        SyncOrchestrator<MemoryLocalStore, MemoryRemoteStore>,
        Arc<ManualClock>,
    ) {
        let clock = Arc::new(ManualClock::new(10_000));
        let orchestrator = SyncOrchestrator::new(
            Arc::new(MemoryLocalStore::new()),
            Arc::new(MemoryRemoteStore::new()),
        )
        .with_clock(clock.clone());
        (orchestrator, clock)
    }

    #[test]
    fn run_is_lazy() {
        let (orchestrator, _) = setup();
        let run = orchestrator.sync(&"o".into());
        assert_eq!(orchestrator.remote().calls().pulls, 0);
        assert_eq!(orchestrator.state(), SyncState::Idle);
        drop(run);
    }

    #[test]
    fn empty_sync_completes_without_ticks() {
        let (orchestrator, _) = setup();
        let mut run = orchestrator.sync(&"o".into());
        assert!(run.next().is_none());
        assert!(run.next().is_none());
        assert!(run.is_finished());
        assert_eq!(orchestrator.state(), SyncState::Completed);
        assert_eq!(orchestrator.stats().runs_completed, 1);
    }

    #[test]
    fn pushed_records_are_marked_synced_at_clock_time() {
        let (orchestrator, clock) = setup();
        let owner = OwnerId::from("o");
        let record = orchestrator
            .local()
            .create_record(&owner, b"v".to_vec(), 9_000)
            .unwrap();
        clock.set(12_000);

        let ticks: Vec<_> = orchestrator.sync(&owner).map(|t| t.unwrap()).collect();
        assert_eq!(ticks, vec![SyncProgress::new(SyncPhase::Push, 1, 1)
            .with_message(record.id.to_string())]);

        let stored = orchestrator.local().get(&record.id).unwrap().unwrap();
        assert_eq!(stored.pending_action, PendingAction::None);
        assert_eq!(stored.last_synced_at, 12_000);
        assert!(orchestrator.remote().get(&record.id).is_some());
    }

    #[test]
    fn synced_at_never_precedes_modification() {
        let (orchestrator, clock) = setup();
        let owner = OwnerId::from("o");
        // clock behind the record, e.g. an edit from a device ahead in time
        let record = orchestrator
            .local()
            .create_record(&owner, b"v".to_vec(), 50_000)
            .unwrap();
        clock.set(20_000);

        orchestrator.sync_to_completion(&owner).unwrap();
        let stored = orchestrator.local().get(&record.id).unwrap().unwrap();
        assert_eq!(stored.last_synced_at, 50_000);
        assert!(stored.validate().is_ok());
    }

    #[test]
    fn unconfirmed_change_is_requeued_and_pushed() {
        let (orchestrator, _) = setup();
        let owner = OwnerId::from("o");
        let mut record = SyncableRecord::with_id("a".into(), owner.clone(), vec![1], 500);
        record.pending_action = PendingAction::None;
        record.last_synced_at = 100;
        orchestrator.local().upsert(record).unwrap();

        let report = orchestrator.sync_to_completion(&owner).unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(report.pushed, 1);
        assert!(orchestrator.remote().get(&"a".into()).is_some());
    }

    /// Forwards to a memory remote and edits the local copy of the first
    /// record it accepts, as an application writing mid-push would.
    struct EditsDuringUpsert {
        remote: MemoryRemoteStore,
        local: Arc<MemoryLocalStore>,
        armed: std::sync::atomic::AtomicBool,
    }

    impl RemoteStore for EditsDuringUpsert {
        fn pull(&self, owner: &OwnerId, since: Timestamp) -> SyncResult<Vec<PulledRecord>> {
            self.remote.pull(owner, since)
        }
        fn upsert(&self, record: &SyncableRecord) -> SyncResult<()> {
            self.remote.upsert(record)?;
            if self.armed.swap(false, std::sync::atomic::Ordering::SeqCst) {
                self.local
                    .edit_record(&record.id, b"newer".to_vec(), 900)
                    .unwrap();
            }
            Ok(())
        }
        fn delete(&self, id: &RecordId) -> SyncResult<()> {
            self.remote.delete(id)
        }
    }

    #[test]
    fn edit_during_push_is_not_lost() {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(EditsDuringUpsert {
            remote: MemoryRemoteStore::new(),
            local: local.clone(),
            armed: true.into(),
        });
        let orchestrator = SyncOrchestrator::new(local.clone(), remote.clone())
            .with_clock(Arc::new(ManualClock::new(1_000)));
        let owner = OwnerId::from("o");
        let record = local.create_record(&owner, b"v1".to_vec(), 100).unwrap();

        let report = orchestrator.sync_to_completion(&owner).unwrap();
        assert_eq!(report.pushed, 1);
        let stored = local.get(&record.id).unwrap().unwrap();
        assert_eq!(stored.payload, b"newer");
        assert_eq!(stored.last_modified_at, 900);
        assert_eq!(stored.pending_action, PendingAction::Upsert);
        assert_eq!(remote.remote.get(&record.id).unwrap().payload, b"v1");

        let report = orchestrator.sync_to_completion(&owner).unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(remote.remote.get(&record.id).unwrap().payload, b"newer");
        assert!(!local.get(&record.id).unwrap().unwrap().pending_sync());
    }

    #[test]
    fn edit_during_pull_is_reconciled_against_current_copy() {
        let (orchestrator, _) = setup();
        let owner = OwnerId::from("o");
        let local = orchestrator.local();
        local
            .upsert(SyncableRecord::with_id("b".into(), owner.clone(), b"old".to_vec(), 100).accept_remote())
            .unwrap();
        let remote = orchestrator.remote();
        remote
            .upsert(&SyncableRecord::with_id("a".into(), owner.clone(), b"ra".to_vec(), 200))
            .unwrap();
        remote
            .upsert(&SyncableRecord::with_id("b".into(), owner.clone(), b"rb".to_vec(), 300))
            .unwrap();

        let mut run = orchestrator.sync(&owner);
        let first = run.next().unwrap().unwrap();
        assert_eq!(first.message.as_deref(), Some("a"));
        local.edit_record(&"b".into(), b"mine".to_vec(), 500).unwrap();
        for tick in run.by_ref() {
            tick.unwrap();
        }

        let report = run.into_report();
        assert_eq!(report.pulled, 1);
        assert_eq!(report.pushed, 1);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].resolution, ConflictResolution::KeepLocal);
        assert_eq!(local.get(&"b".into()).unwrap().unwrap().payload, b"mine");
        assert_eq!(remote.get(&"b".into()).unwrap().payload, b"mine");
    }

    #[test]
    fn malformed_and_foreign_records_are_skipped_but_ticked() {
        struct Poisoned;
        impl RemoteStore for Poisoned {
            fn pull(&self, _: &OwnerId, _: Timestamp) -> SyncResult<Vec<PulledRecord>> {
                Ok(vec![
                    Err(crate::error::MalformedRecord::new(None, "bad cbor")),
                    Ok(SyncableRecord::with_id("x".into(), "someone-else".into(), vec![], 5)),
                    Ok(SyncableRecord::with_id("ok".into(), "o".into(), vec![7], 6)),
                ])
            }
            fn upsert(&self, _: &SyncableRecord) -> SyncResult<()> {
                Ok(())
            }
            fn delete(&self, _: &RecordId) -> SyncResult<()> {
                Ok(())
            }
        }

        let local = Arc::new(MemoryLocalStore::new());
        let orchestrator = SyncOrchestrator::new(local.clone(), Arc::new(Poisoned));
        let mut run = orchestrator.sync(&"o".into());
        let ticks: Vec<_> = run.by_ref().map(|t| t.unwrap()).collect();

        assert_eq!(ticks.len(), 3);
        assert!(ticks.iter().all(|t| t.phase == SyncPhase::Pull && t.total == 3));
        assert_eq!(run.report().skipped, 2);
        assert_eq!(run.report().pulled, 1);
        assert_eq!(local.len(), 1);
        assert!(local.get(&"x".into()).unwrap().is_none());
    }

    #[test]
    fn pull_failure_ends_stream_with_error() {
        let (orchestrator, _) = setup();
        orchestrator.remote().set_connected(false);
        let mut run = orchestrator.sync(&"o".into());
        assert!(matches!(run.next(), Some(Err(SyncError::Connectivity(_)))));
        assert!(run.next().is_none());
        assert_eq!(orchestrator.state(), SyncState::Failed);
        assert!(orchestrator.stats().last_error.is_some());
    }

    #[test]
    fn cancelled_run_yields_cancelled() {
        let (orchestrator, _) = setup();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut run = orchestrator.sync_with_cancel(&"o".into(), cancel);
        assert!(matches!(run.next(), Some(Err(SyncError::Cancelled))));
        assert_eq!(orchestrator.remote().calls().pulls, 0);
    }

    #[test]
    fn purge_removes_confirmed_tombstones_only() {
        let (orchestrator, clock) = setup();
        let owner = OwnerId::from("o");
        let local = orchestrator.local();
        let gone = local.create_record(&owner, vec![1], 1_000).unwrap();
        let kept = local.create_record(&owner, vec![2], 1_001).unwrap();
        local.delete_record(&gone.id, 2_000).unwrap();
        orchestrator.sync_to_completion(&owner).unwrap();

        // still pending delete: not purgeable
        local.delete_record(&kept.id, 20_000).unwrap();

        clock.set(100_000);
        let purged = orchestrator.purge_confirmed_deletes(&owner, 50_000).unwrap();
        assert_eq!(purged, 1);
        assert!(local.get(&gone.id).unwrap().is_none());
        assert!(orchestrator.remote().get(&gone.id).is_none());
        assert!(local.get(&kept.id).unwrap().is_some());
        assert_eq!(orchestrator.stats().tombstones_purged, 1);
    }
}
