//! Test fixtures and store helpers.
//!
//! Provides record builders and pre-wired local/remote store pairs.

use driftsync_engine::{MemoryRemoteStore, SyncError, SyncOrchestrator, SyncProgress, SyncResult};
use driftsync_protocol::{ManualClock, OwnerId, PendingAction, SyncableRecord, Timestamp};
use driftsync_store::{FileJournal, JournaledLocalStore, MemoryLocalStore, StoreConfig};
use std::sync::Arc;
use tempfile::TempDir;

/// Builds a new local record awaiting its first push.
pub fn record(id: &str, owner: &str, modified_at: Timestamp) -> SyncableRecord {
    SyncableRecord::with_id(id.into(), owner.into(), id.as_bytes().to_vec(), modified_at)
}

/// Builds a record in the state the remote store of record holds it.
pub fn synced_record(id: &str, owner: &str, modified_at: Timestamp) -> SyncableRecord {
    record(id, owner, modified_at).accept_remote()
}

/// Builds a record with the given payload and pending action.
///
/// Non-pending records count as synced at `modified_at`.
pub fn record_with(
    id: &str,
    owner: &str,
    payload: &[u8],
    modified_at: Timestamp,
    action: PendingAction,
) -> SyncableRecord {
    let mut r = SyncableRecord::with_id(id.into(), owner.into(), payload.to_vec(), modified_at);
    r.pending_action = action;
    r.deleted = action == PendingAction::Delete;
    if action == PendingAction::None {
        r.last_synced_at = modified_at;
    }
    r
}

/// An in-memory local store, an in-memory remote and a manual clock.
pub struct TestStores {
    /// Local store.
    pub local: Arc<MemoryLocalStore>,
    /// Remote store.
    pub remote: Arc<MemoryRemoteStore>,
    /// Clock shared by the orchestrator.
    pub clock: Arc<ManualClock>,
}

impl TestStores {
    /// Creates empty stores with the clock at `now`.
    pub fn new(now: Timestamp) -> Self {
        Self {
            local: Arc::new(MemoryLocalStore::new()),
            remote: Arc::new(MemoryRemoteStore::new()),
            clock: Arc::new(ManualClock::new(now)),
        }
    }

    /// Returns an orchestrator over these stores.
    pub fn orchestrator(&self) -> SyncOrchestrator<MemoryLocalStore, MemoryRemoteStore> {
        SyncOrchestrator::new(Arc::clone(&self.local), Arc::clone(&self.remote))
            .with_clock(self.clock.clone())
    }

    /// Returns the owner used by most tests.
    pub fn owner() -> OwnerId {
        OwnerId::from("alice")
    }
}

/// A journaled store in a temporary directory.
///
/// The directory lives as long as this value.
pub struct TempJournalStore {
    /// The store.
    pub store: JournaledLocalStore<FileJournal>,
    dir: TempDir,
}

impl TempJournalStore {
    /// Opens a store in a fresh temporary directory.
    pub fn new(config: StoreConfig) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = JournaledLocalStore::open_dir(dir.path(), config)
            .expect("Failed to open journaled store");
        Self { store, dir }
    }

    /// Returns the store directory.
    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// Closes and reopens the store, replaying the journal.
    pub fn reopen(self) -> Self {
        let Self { store, dir } = self;
        let config = store.config().clone();
        drop(store);
        let store =
            JournaledLocalStore::open_dir(dir.path(), config).expect("Failed to reopen store");
        Self { store, dir }
    }
}

/// The ticks of a drained run and the error that ended it, if any.
#[derive(Debug)]
pub struct RunOutcome {
    /// Every progress tick, in order.
    pub ticks: Vec<SyncProgress>,
    /// The final error.
    pub error: Option<SyncError>,
}

impl RunOutcome {
    /// Returns true if the run ended without error.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Drains a progress stream.
pub fn drain(run: impl Iterator<Item = SyncResult<SyncProgress>>) -> RunOutcome {
    let mut ticks = Vec::new();
    for item in run {
        match item {
            Ok(tick) => ticks.push(tick),
            Err(e) => {
                return RunOutcome {
                    ticks,
                    error: Some(e),
                }
            }
        }
    }
    RunOutcome { ticks, error: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_store::{LocalStore, LocalWrites};

    #[test]
    fn record_builders_are_valid() {
        assert!(record("a", "o", 10).validate().is_ok());
        assert!(synced_record("a", "o", 10).validate().is_ok());
        assert!(record_with("a", "o", b"x", 10, PendingAction::Delete)
            .validate()
            .is_ok());
    }

    #[test]
    fn temp_journal_store_survives_reopen() {
        let fixture = TempJournalStore::new(StoreConfig::default());
        let created = fixture
            .store
            .create_record(&"o".into(), b"x".to_vec(), 5)
            .unwrap();

        let fixture = fixture.reopen();
        assert!(fixture.store.get(&created.id).unwrap().is_some());
    }

    #[test]
    fn drain_collects_until_error() {
        let stores = TestStores::new(1_000);
        stores.remote.set_connected(false);
        let outcome = drain(stores.orchestrator().sync(&TestStores::owner()));
        assert!(outcome.ticks.is_empty());
        assert!(matches!(outcome.error, Some(SyncError::Connectivity(_))));
    }
}
