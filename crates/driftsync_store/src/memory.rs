//! In-memory local store.

use crate::error::StoreResult;
use crate::index::RecordIndex;
use crate::local::LocalStore;
use driftsync_protocol::{OwnerId, RecordId, SyncableRecord, Timestamp};
use parking_lot::RwLock;

/// A local store that keeps records in memory.
///
/// Data is lost when the store is dropped. Useful for tests and as a
/// cache-only store.
///
/// # Example
///
/// ```rust
/// use driftsync_store::{LocalStore, LocalWrites, MemoryLocalStore};
///
/// let store = MemoryLocalStore::new();
/// let record = store.create_record(&"alice".into(), b"hello".to_vec(), 1_000).unwrap();
/// assert_eq!(store.list_pending(&"alice".into()).unwrap(), vec![record]);
/// ```
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    index: RwLock<RecordIndex>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `records`.
    pub fn with_records(records: impl IntoIterator<Item = SyncableRecord>) -> Self {
        let mut index = RecordIndex::default();
        for record in records {
            index.put(record);
        }
        Self {
            index: RwLock::new(index),
        }
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, id: &RecordId) -> StoreResult<Option<SyncableRecord>> {
        Ok(self.index.read().get(id).cloned())
    }

    fn list_for_owner(&self, owner: &OwnerId) -> StoreResult<Vec<SyncableRecord>> {
        Ok(self.index.read().for_owner(owner))
    }

    fn list_pending(&self, owner: &OwnerId) -> StoreResult<Vec<SyncableRecord>> {
        Ok(self.index.read().pending(owner))
    }

    fn upsert(&self, record: SyncableRecord) -> StoreResult<()> {
        self.index.write().put(record);
        Ok(())
    }

    fn upsert_if_unchanged(
        &self,
        record: SyncableRecord,
        expected_modified_at: Option<Timestamp>,
    ) -> StoreResult<bool> {
        let mut index = self.index.write();
        if index.modified_at(&record.id) != expected_modified_at {
            return Ok(false);
        }
        index.put(record);
        Ok(true)
    }

    fn mark_synced(
        &self,
        id: &RecordId,
        pushed_modified_at: Timestamp,
        synced_at: Timestamp,
    ) -> StoreResult<bool> {
        let mut index = self.index.write();
        match index.synced_copy(id, pushed_modified_at, synced_at)? {
            Some(record) => {
                index.put(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn latest_modified_at(&self, owner: &OwnerId) -> StoreResult<Timestamp> {
        Ok(self.index.read().latest_modified_at(owner))
    }

    fn purge(&self, id: &RecordId) -> StoreResult<bool> {
        Ok(self.index.write().remove(id))
    }
}
