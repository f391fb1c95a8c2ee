//! In-memory record index shared by the store implementations.

use crate::error::{StoreError, StoreResult};
use driftsync_protocol::{OwnerId, RecordId, SyncableRecord, Timestamp};
use std::collections::HashMap;

/// Records keyed by identifier.
#[derive(Debug, Default, Clone)]
pub(crate) struct RecordIndex {
    records: HashMap<RecordId, SyncableRecord>,
}

impl RecordIndex {
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn get(&self, id: &RecordId) -> Option<&SyncableRecord> {
        self.records.get(id)
    }

    /// Inserts or replaces. Returns true if a previous version existed.
    pub(crate) fn put(&mut self, record: SyncableRecord) -> bool {
        self.records.insert(record.id.clone(), record).is_some()
    }

    pub(crate) fn remove(&mut self, id: &RecordId) -> bool {
        self.records.remove(id).is_some()
    }

    /// Newest first; ties ordered by id for determinism.
    pub(crate) fn for_owner(&self, owner: &OwnerId) -> Vec<SyncableRecord> {
        let mut out: Vec<_> = self
            .records
            .values()
            .filter(|r| &r.owner_id == owner)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.last_modified_at
                .cmp(&a.last_modified_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        out
    }

    /// Oldest first; ties ordered by id.
    pub(crate) fn pending(&self, owner: &OwnerId) -> Vec<SyncableRecord> {
        let mut out: Vec<_> = self
            .records
            .values()
            .filter(|r| &r.owner_id == owner && r.pending_sync())
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.last_modified_at
                .cmp(&b.last_modified_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        out
    }

    pub(crate) fn latest_modified_at(&self, owner: &OwnerId) -> Timestamp {
        self.records
            .values()
            .filter(|r| &r.owner_id == owner)
            .map(|r| r.last_modified_at)
            .max()
            .unwrap_or(0)
    }

    /// Modification stamp of a stored record, `None` when absent.
    pub(crate) fn modified_at(&self, id: &RecordId) -> Option<Timestamp> {
        self.records.get(id).map(|r| r.last_modified_at)
    }

    /// Returns the record as it would look after `mark_synced`, without
    /// applying it.
    ///
    /// Returns `None` when the stored copy no longer carries `pushed_modified_at`:
    /// it was changed after the push and must stay pending.
    pub(crate) fn synced_copy(
        &self,
        id: &RecordId,
        pushed_modified_at: Timestamp,
        synced_at: Timestamp,
    ) -> StoreResult<Option<SyncableRecord>> {
        let current = self
            .records
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if current.last_modified_at != pushed_modified_at {
            return Ok(None);
        }
        let mut record = current.clone();
        record.mark_synced(synced_at);
        Ok(Some(record))
    }

    /// All records sorted by id.
    pub(crate) fn sorted(&self) -> Vec<&SyncableRecord> {
        let mut out: Vec<_> = self.records.values().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, owner: &str, modified: Timestamp) -> SyncableRecord {
        SyncableRecord::with_id(id.into(), owner.into(), vec![], modified)
    }

    #[test]
    fn orderings() {
        let mut index = RecordIndex::default();
        index.put(record("b", "o", 20));
        index.put(record("a", "o", 10));
        index.put(record("c", "o", 30));
        index.put(record("z", "other", 99));

        let owner = OwnerId::from("o");
        let newest: Vec<_> = index.for_owner(&owner).into_iter().map(|r| r.id).collect();
        assert_eq!(newest, vec!["c".into(), "b".into(), "a".into()]);

        let oldest: Vec<_> = index.pending(&owner).into_iter().map(|r| r.id).collect();
        assert_eq!(oldest, vec!["a".into(), "b".into(), "c".into()]);

        assert_eq!(index.latest_modified_at(&owner), 30);
        assert_eq!(index.latest_modified_at(&"nobody".into()), 0);
    }

    #[test]
    fn synced_copy_requires_existing_record() {
        let mut index = RecordIndex::default();
        index.put(record("a", "o", 10));
        let copy = index.synced_copy(&"a".into(), 10, 15).unwrap().unwrap();
        assert!(!copy.pending_sync());
        assert!(index.get(&"a".into()).unwrap().pending_sync());
        assert!(matches!(
            index.synced_copy(&"missing".into(), 1, 1),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn synced_copy_skips_records_changed_after_push() {
        let mut index = RecordIndex::default();
        index.put(record("a", "o", 12));
        assert!(index.synced_copy(&"a".into(), 10, 15).unwrap().is_none());
        assert_eq!(index.modified_at(&"a".into()), Some(12));
        assert_eq!(index.modified_at(&"b".into()), None);
    }
}
