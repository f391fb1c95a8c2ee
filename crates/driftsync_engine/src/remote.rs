//! The remote store contract and an in-process implementation.

use crate::error::{MalformedRecord, SyncError, SyncResult};
use driftsync_protocol::{OwnerId, RecordId, SyncableRecord, Timestamp};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// One item of a pull batch.
///
/// A transport that decodes records one by one reports an undecodable record
/// as `Err` instead of failing the whole batch.
pub type PulledRecord = Result<SyncableRecord, MalformedRecord>;

/// The authoritative store of record.
///
/// All three operations may fail with [`SyncError::Connectivity`] or
/// [`SyncError::Authorization`].
pub trait RemoteStore: Send + Sync {
    /// Returns every record of `owner` with `last_modified_at > since`,
    /// ascending by `last_modified_at`, soft-deleted ones included.
    ///
    /// `since == 0` requests a full resync.
    fn pull(&self, owner: &OwnerId, since: Timestamp) -> SyncResult<Vec<PulledRecord>>;

    /// Creates or replaces the remote copy. Full replace, never a patch.
    fn upsert(&self, record: &SyncableRecord) -> SyncResult<()>;

    /// Hard-deletes a record.
    ///
    /// Only for confirmed, fully propagated soft deletes.
    fn delete(&self, id: &RecordId) -> SyncResult<()>;
}

/// Call counters of a [`MemoryRemoteStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteCalls {
    /// Number of pull calls.
    pub pulls: u64,
    /// Number of upsert calls.
    pub upserts: u64,
    /// Number of delete calls.
    pub deletes: u64,
}

/// An in-process remote store.
///
/// Stores the normalized remote copy of every record: no pending action,
/// synced at its own modification time.
#[derive(Debug)]
pub struct MemoryRemoteStore {
    records: RwLock<HashMap<RecordId, SyncableRecord>>,
    authorized: RwLock<Option<HashSet<OwnerId>>>,
    connected: AtomicBool,
    pulls: AtomicU64,
    upserts: AtomicU64,
    deletes: AtomicU64,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    /// Creates an empty, reachable store that accepts every owner.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            authorized: RwLock::new(None),
            connected: AtomicBool::new(true),
            pulls: AtomicU64::new(0),
            upserts: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Creates a store seeded with `records`.
    pub fn with_records(records: impl IntoIterator<Item = SyncableRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.put(record);
        }
        store
    }

    /// Restricts access to the given owners.
    pub fn set_authorized(&self, owners: impl IntoIterator<Item = OwnerId>) {
        *self.authorized.write() = Some(owners.into_iter().collect());
    }

    /// Makes the store reachable or unreachable.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Inserts a record directly, as if another device had pushed it.
    pub fn put(&self, record: SyncableRecord) {
        let record = record.accept_remote();
        self.records.write().insert(record.id.clone(), record);
    }

    /// Returns the stored copy of a record.
    pub fn get(&self, id: &RecordId) -> Option<SyncableRecord> {
        self.records.read().get(id).cloned()
    }

    /// Returns every stored record, sorted by id.
    pub fn snapshot(&self) -> Vec<SyncableRecord> {
        let mut out: Vec<_> = self.records.read().values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the call counters.
    pub fn calls(&self) -> RemoteCalls {
        RemoteCalls {
            pulls: self.pulls.load(Ordering::SeqCst),
            upserts: self.upserts.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
        }
    }

    fn check_connected(&self) -> SyncResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::Connectivity("remote store unreachable".into()))
        }
    }

    fn check_owner(&self, owner: &OwnerId) -> SyncResult<()> {
        match &*self.authorized.read() {
            Some(allowed) if !allowed.contains(owner) => Err(SyncError::Authorization(format!(
                "owner {owner} is not authorized"
            ))),
            _ => Ok(()),
        }
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn pull(&self, owner: &OwnerId, since: Timestamp) -> SyncResult<Vec<PulledRecord>> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        self.check_connected()?;
        self.check_owner(owner)?;

        let mut batch: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|r| &r.owner_id == owner && r.last_modified_at > since)
            .cloned()
            .collect();
        batch.sort_by(|a, b| {
            a.last_modified_at
                .cmp(&b.last_modified_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(batch.into_iter().map(Ok).collect())
    }

    fn upsert(&self, record: &SyncableRecord) -> SyncResult<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.check_connected()?;
        self.check_owner(&record.owner_id)?;
        self.put(record.clone());
        Ok(())
    }

    fn delete(&self, id: &RecordId) -> SyncResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_connected()?;
        if let Some(existing) = self.get(id) {
            self.check_owner(&existing.owner_id)?;
        }
        self.records.write().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_protocol::PendingAction;

    fn record(id: &str, owner: &str, modified: Timestamp) -> SyncableRecord {
        SyncableRecord::with_id(id.into(), owner.into(), vec![], modified)
    }

    #[test]
    fn pull_filters_and_orders() {
        let remote = MemoryRemoteStore::with_records([
            record("c", "o", 30),
            record("a", "o", 10),
            record("b", "o", 20),
            record("x", "other", 40),
        ]);

        let pulled: Vec<_> = remote
            .pull(&"o".into(), 10)
            .unwrap()
            .into_iter()
            .map(|r| r.unwrap().id)
            .collect();
        assert_eq!(pulled, vec!["b".into(), "c".into()]);
        assert_eq!(remote.pull(&"o".into(), 0).unwrap().len(), 3);
        assert_eq!(remote.calls().pulls, 2);
    }

    #[test]
    fn stored_copies_are_normalized() {
        let remote = MemoryRemoteStore::new();
        let mut r = record("a", "o", 10);
        r.soft_delete(20);
        remote.upsert(&r).unwrap();

        let stored = remote.get(&"a".into()).unwrap();
        assert!(stored.deleted);
        assert_eq!(stored.pending_action, PendingAction::None);
        assert_eq!(stored.last_synced_at, 20);
    }

    #[test]
    fn unreachable_store_fails_with_connectivity() {
        let remote = MemoryRemoteStore::new();
        remote.set_connected(false);
        assert!(matches!(
            remote.pull(&"o".into(), 0),
            Err(SyncError::Connectivity(_))
        ));
        assert!(matches!(
            remote.upsert(&record("a", "o", 1)),
            Err(SyncError::Connectivity(_))
        ));
    }

    #[test]
    fn unauthorized_owner_is_rejected() {
        let remote = MemoryRemoteStore::new();
        remote.set_authorized([OwnerId::from("alice")]);
        assert!(remote.pull(&"alice".into(), 0).is_ok());
        assert!(matches!(
            remote.pull(&"mallory".into(), 0),
            Err(SyncError::Authorization(_))
        ));
        assert!(matches!(
            remote.upsert(&record("a", "mallory", 1)),
            Err(SyncError::Authorization(_))
        ));
    }

    #[test]
    fn delete_is_idempotent() {
        let remote = MemoryRemoteStore::with_records([record("a", "o", 1)]);
        remote.delete(&"a".into()).unwrap();
        remote.delete(&"a".into()).unwrap();
        assert!(remote.is_empty());
        assert_eq!(remote.calls().deletes, 2);
    }
}
