//! The hub: the server's owner-partitioned record collection.
//!
//! Records are stored in their store-of-record form: nothing pending, synced
//! at their own modification time. A record id belongs to the owner that
//! first wrote it.

use crate::error::{ServerError, ServerResult};
use driftsync_protocol::{from_cbor, to_cbor, OwnerId, RecordId, SyncableRecord, Timestamp};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Owner-partitioned record storage.
#[derive(Debug, Default)]
pub struct RecordHub {
    partitions: RwLock<HashMap<OwnerId, BTreeMap<RecordId, SyncableRecord>>>,
    owners: RwLock<HashMap<RecordId, OwnerId>>,
}

impl RecordHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a hub holding `records`.
    pub fn with_records(records: impl IntoIterator<Item = SyncableRecord>) -> ServerResult<Self> {
        let hub = Self::new();
        for record in records {
            hub.upsert(record)?;
        }
        Ok(hub)
    }

    /// Returns the owner's records modified after `since`, ascending.
    pub fn pull(&self, owner: &OwnerId, since: Timestamp) -> Vec<SyncableRecord> {
        let partitions = self.partitions.read();
        let Some(partition) = partitions.get(owner) else {
            return Vec::new();
        };
        let mut batch: Vec<_> = partition
            .values()
            .filter(|r| r.last_modified_at > since)
            .cloned()
            .collect();
        batch.sort_by(|a, b| {
            a.last_modified_at
                .cmp(&b.last_modified_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        batch
    }

    /// Replaces a record wholesale.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotAuthorized`] if the id belongs to another
    /// owner and [`ServerError::InvalidRequest`] for an empty id.
    pub fn upsert(&self, record: SyncableRecord) -> ServerResult<()> {
        if record.id.as_str().is_empty() {
            return Err(ServerError::InvalidRequest("record id must not be empty".into()));
        }

        let mut owners = self.owners.write();
        if let Some(existing) = owners.get(&record.id) {
            if existing != &record.owner_id {
                return Err(ServerError::NotAuthorized(format!(
                    "record {} belongs to another owner",
                    record.id
                )));
            }
        }
        owners.insert(record.id.clone(), record.owner_id.clone());

        let record = record.accept_remote();
        self.partitions
            .write()
            .entry(record.owner_id.clone())
            .or_default()
            .insert(record.id.clone(), record);
        Ok(())
    }

    /// Hard-deletes a record. Returns it if it existed.
    pub fn delete(&self, id: &RecordId) -> Option<SyncableRecord> {
        let owner = self.owners.write().remove(id)?;
        let mut partitions = self.partitions.write();
        let partition = partitions.get_mut(&owner)?;
        let removed = partition.remove(id);
        if partition.is_empty() {
            partitions.remove(&owner);
        }
        removed
    }

    /// Returns the owner of a record id.
    pub fn owner_of(&self, id: &RecordId) -> Option<OwnerId> {
        self.owners.read().get(id).cloned()
    }

    /// Returns a record.
    pub fn get(&self, id: &RecordId) -> Option<SyncableRecord> {
        let owner = self.owner_of(id)?;
        self.partitions.read().get(&owner)?.get(id).cloned()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.owners.read().len()
    }

    /// Returns true if the hub holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of owners with at least one record.
    pub fn owner_count(&self) -> usize {
        self.partitions.read().len()
    }

    /// Returns every record, ordered by owner then id.
    pub fn snapshot(&self) -> Vec<SyncableRecord> {
        let partitions = self.partitions.read();
        let mut owners: Vec<_> = partitions.keys().collect();
        owners.sort();
        owners
            .into_iter()
            .filter_map(|owner| partitions.get(owner))
            .flat_map(|partition| partition.values().cloned())
            .collect()
    }

    /// Encodes the snapshot as CBOR.
    pub fn encode_snapshot(&self) -> ServerResult<Vec<u8>> {
        Ok(to_cbor(&self.snapshot())?)
    }

    /// Rebuilds a hub from [`encode_snapshot`](Self::encode_snapshot) output.
    pub fn decode_snapshot(bytes: &[u8]) -> ServerResult<Self> {
        let records: Vec<SyncableRecord> = from_cbor(bytes)?;
        Self::with_records(records)
    }

    /// Writes the snapshot to `path` atomically.
    pub fn save(&self, path: &Path) -> ServerResult<()> {
        let bytes = self.encode_snapshot()?;
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        tracing::debug!(path = %path.display(), records = self.len(), "hub snapshot saved");
        Ok(())
    }

    /// Loads a hub from `path`. A missing file yields an empty hub.
    pub fn load(path: &Path) -> ServerResult<Self> {
        match fs::read(path) {
            Ok(bytes) => {
                let hub = Self::decode_snapshot(&bytes)?;
                tracing::debug!(path = %path.display(), records = hub.len(), "hub snapshot loaded");
                Ok(hub)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_protocol::PendingAction;

    fn record(id: &str, owner: &str, modified: Timestamp) -> SyncableRecord {
        SyncableRecord::with_id(id.into(), owner.into(), id.as_bytes().to_vec(), modified)
    }

    #[test]
    fn pull_is_partitioned_and_ordered() {
        let hub = RecordHub::with_records([
            record("b", "alice", 20),
            record("a", "alice", 10),
            record("c", "bob", 5),
        ])
        .unwrap();

        let ids: Vec<_> = hub.pull(&"alice".into(), 0).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![RecordId::from("a"), RecordId::from("b")]);
        assert_eq!(hub.pull(&"alice".into(), 10).len(), 1);
        assert!(hub.pull(&"carol".into(), 0).is_empty());
        assert_eq!(hub.owner_count(), 2);
    }

    #[test]
    fn stored_records_are_normalized() {
        let hub = RecordHub::new();
        hub.upsert(record("a", "alice", 10)).unwrap();
        let stored = hub.get(&"a".into()).unwrap();
        assert_eq!(stored.pending_action, PendingAction::None);
        assert_eq!(stored.last_synced_at, 10);
    }

    #[test]
    fn ids_cannot_cross_owners() {
        let hub = RecordHub::new();
        hub.upsert(record("a", "alice", 10)).unwrap();
        assert!(matches!(
            hub.upsert(record("a", "mallory", 20)),
            Err(ServerError::NotAuthorized(_))
        ));
        assert_eq!(hub.get(&"a".into()).unwrap().owner_id, OwnerId::from("alice"));
    }

    #[test]
    fn delete_frees_the_id() {
        let hub = RecordHub::new();
        hub.upsert(record("a", "alice", 10)).unwrap();
        assert!(hub.delete(&"a".into()).is_some());
        assert!(hub.delete(&"a".into()).is_none());
        assert!(hub.is_empty());
        assert_eq!(hub.owner_count(), 0);
    }

    #[test]
    fn snapshot_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.cbor");
        let hub = RecordHub::with_records([record("a", "alice", 10), record("b", "bob", 20)])
            .unwrap();
        hub.save(&path).unwrap();

        let loaded = RecordHub::load(&path).unwrap();
        assert_eq!(loaded.snapshot(), hub.snapshot());
        assert!(RecordHub::load(&dir.path().join("missing.cbor")).unwrap().is_empty());
    }
}
