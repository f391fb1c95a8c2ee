//! Remote store doubles.
//!
//! [`ScriptedRemote`] fails chosen calls and records every upsert.
//! [`GatedRemote`] parks pulls until released, to hold a job in flight.
//! [`ServerLoopback`] connects an [`HttpRemoteStore`] to an in-process
//! [`SyncServer`].

use driftsync_engine::{
    HttpRemoteStore, LoopbackClient, LoopbackServer, MalformedRecord, MemoryRemoteStore,
    PulledRecord, RemoteCalls, RemoteStore, SyncError, SyncResult,
};
use driftsync_protocol::{OwnerId, RecordId, SyncableRecord, Timestamp};
use driftsync_server::SyncServer;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// The error a scripted failure produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// [`SyncError::Connectivity`].
    Connectivity,
    /// [`SyncError::Remote`].
    Remote,
    /// [`SyncError::Authorization`].
    Authorization,
}

impl ScriptedFailure {
    fn to_error(self) -> SyncError {
        match self {
            ScriptedFailure::Connectivity => SyncError::Connectivity("scripted: offline".into()),
            ScriptedFailure::Remote => SyncError::Remote("scripted: server error".into()),
            ScriptedFailure::Authorization => {
                SyncError::Authorization("scripted: token rejected".into())
            }
        }
    }
}

/// A remote backed by [`MemoryRemoteStore`] with scripted misbehavior.
///
/// Upsert calls are numbered from 1 over the remote's lifetime.
#[derive(Debug, Default)]
pub struct ScriptedRemote {
    inner: MemoryRemoteStore,
    ignore_cursor: AtomicBool,
    failing_upserts: Mutex<HashSet<usize>>,
    failing_pulls: AtomicUsize,
    failure: Mutex<Option<ScriptedFailure>>,
    malformed: Mutex<Vec<MalformedRecord>>,
    upsert_calls: AtomicUsize,
    upserted: Mutex<Vec<SyncableRecord>>,
}

impl ScriptedRemote {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a remote holding `records`.
    pub fn with_records(records: impl IntoIterator<Item = SyncableRecord>) -> Self {
        Self {
            inner: MemoryRemoteStore::with_records(records),
            ..Self::default()
        }
    }

    /// Returns the backing store.
    pub fn store(&self) -> &MemoryRemoteStore {
        &self.inner
    }

    /// Makes `pull` return every record of the owner regardless of cursor.
    pub fn ignore_cursor(&self, ignore: bool) {
        self.ignore_cursor.store(ignore, Ordering::SeqCst);
    }

    /// Fails the `n`-th upsert call (1-based) with `failure`.
    pub fn fail_upsert_call(&self, n: usize, failure: ScriptedFailure) {
        self.failing_upserts.lock().insert(n);
        *self.failure.lock() = Some(failure);
    }

    /// Fails the next `count` pull calls with `failure`.
    pub fn fail_next_pulls(&self, count: usize, failure: ScriptedFailure) {
        self.failing_pulls.store(count, Ordering::SeqCst);
        *self.failure.lock() = Some(failure);
    }

    /// Appends a malformed entry to every pull batch.
    pub fn inject_malformed(&self, malformed: MalformedRecord) {
        self.malformed.lock().push(malformed);
    }

    /// Returns every record passed to a successful upsert, in call order.
    pub fn upserted(&self) -> Vec<SyncableRecord> {
        self.upserted.lock().clone()
    }

    /// Returns the number of upsert calls, failed ones included.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Returns call counters of the backing store.
    pub fn calls(&self) -> RemoteCalls {
        self.inner.calls()
    }

    fn scripted_error(&self) -> SyncError {
        let failure = *self.failure.lock();
        failure.unwrap_or(ScriptedFailure::Connectivity).to_error()
    }
}

impl RemoteStore for ScriptedRemote {
    fn pull(&self, owner: &OwnerId, since: Timestamp) -> SyncResult<Vec<PulledRecord>> {
        let failing = self
            .failing_pulls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(self.scripted_error());
        }

        let cursor = if self.ignore_cursor.load(Ordering::SeqCst) {
            0
        } else {
            since
        };
        let mut batch = self.inner.pull(owner, cursor)?;
        batch.extend(self.malformed.lock().iter().cloned().map(Err));
        Ok(batch)
    }

    fn upsert(&self, record: &SyncableRecord) -> SyncResult<()> {
        let call = self.upsert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_upserts.lock().contains(&call) {
            return Err(self.scripted_error());
        }
        self.inner.upsert(record)?;
        self.upserted.lock().push(record.clone());
        Ok(())
    }

    fn delete(&self, id: &RecordId) -> SyncResult<()> {
        self.inner.delete(id)
    }
}

/// A remote whose pulls park until [`open`](GatedRemote::open) is called.
#[derive(Debug, Default)]
pub struct GatedRemote {
    inner: MemoryRemoteStore,
    open: Mutex<bool>,
    released: Condvar,
    waiting: AtomicUsize,
}

impl GatedRemote {
    /// Creates a closed gate over an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases parked and future pulls.
    pub fn open(&self) {
        *self.open.lock() = true;
        self.released.notify_all();
    }

    /// Returns the number of pulls currently parked.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Returns call counters of the backing store.
    pub fn calls(&self) -> RemoteCalls {
        self.inner.calls()
    }
}

impl RemoteStore for GatedRemote {
    fn pull(&self, owner: &OwnerId, since: Timestamp) -> SyncResult<Vec<PulledRecord>> {
        {
            let mut open = self.open.lock();
            self.waiting.fetch_add(1, Ordering::SeqCst);
            while !*open {
                // bounded so a forgotten open() fails the test instead of hanging it
                if self
                    .released
                    .wait_for(&mut open, Duration::from_secs(10))
                    .timed_out()
                {
                    self.waiting.fetch_sub(1, Ordering::SeqCst);
                    return Err(SyncError::Timeout);
                }
            }
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.pull(owner, since)
    }

    fn upsert(&self, record: &SyncableRecord) -> SyncResult<()> {
        self.inner.upsert(record)
    }

    fn delete(&self, id: &RecordId) -> SyncResult<()> {
        self.inner.delete(id)
    }
}

/// Routes loopback requests into a [`SyncServer`].
#[derive(Clone)]
pub struct ServerLoopback(pub Arc<SyncServer>);

impl LoopbackServer for ServerLoopback {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.0.handle_post(path, body)
    }
}

/// An HTTP remote store wired to `server` in-process.
pub type LoopbackRemote = HttpRemoteStore<LoopbackClient<ServerLoopback>>;

/// Builds an HTTP remote store that talks to `server` in-process.
pub fn loopback_remote(server: Arc<SyncServer>) -> LoopbackRemote {
    HttpRemoteStore::new(
        "http://loopback.invalid",
        LoopbackClient::new(ServerLoopback(server)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::synced_record;

    #[test]
    fn upsert_failure_hits_only_the_chosen_call() {
        let remote = ScriptedRemote::new();
        remote.fail_upsert_call(2, ScriptedFailure::Remote);

        assert!(remote.upsert(&synced_record("a", "o", 1)).is_ok());
        assert!(matches!(
            remote.upsert(&synced_record("b", "o", 2)),
            Err(SyncError::Remote(_))
        ));
        assert!(remote.upsert(&synced_record("b", "o", 2)).is_ok());
        assert_eq!(remote.upsert_calls(), 3);
        assert_eq!(remote.upserted().len(), 2);
    }

    #[test]
    fn ignoring_the_cursor_returns_everything() {
        let remote = ScriptedRemote::with_records([synced_record("a", "o", 50)]);
        assert!(remote.pull(&"o".into(), 100).unwrap().is_empty());
        remote.ignore_cursor(true);
        assert_eq!(remote.pull(&"o".into(), 100).unwrap().len(), 1);
    }

    #[test]
    fn pull_failures_are_counted_down() {
        let remote = ScriptedRemote::new();
        remote.fail_next_pulls(1, ScriptedFailure::Connectivity);
        assert!(remote.pull(&"o".into(), 0).is_err());
        assert!(remote.pull(&"o".into(), 0).is_ok());
    }

    #[test]
    fn loopback_remote_reaches_the_server() {
        let server = Arc::new(SyncServer::new(driftsync_server::ServerConfig::default()));
        let remote = loopback_remote(Arc::clone(&server));
        remote.upsert(&synced_record("a", "o", 1)).unwrap();
        assert_eq!(server.hub().len(), 1);
        assert_eq!(remote.pull(&"o".into(), 0).unwrap().len(), 1);
    }

    #[test]
    fn open_gate_does_not_block() {
        let remote = GatedRemote::new();
        remote.open();
        assert!(remote.pull(&"o".into(), 0).unwrap().is_empty());
        assert_eq!(remote.waiting(), 0);
    }
}
