//! Durable local store backed by an append-only journal.

use crate::backend::{FileJournal, JournalBackend};
use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::index::RecordIndex;
use crate::journal::{JournalEntry, Replay};
use crate::local::LocalStore;
use driftsync_protocol::{OwnerId, RecordId, SyncableRecord, Timestamp};
use parking_lot::Mutex;
use std::path::Path;

/// Outcome of a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Journal size before compaction.
    pub bytes_before: u64,
    /// Journal size after compaction.
    pub bytes_after: u64,
    /// Live records written.
    pub records: usize,
}

struct Inner<B> {
    backend: B,
    index: RecordIndex,
    /// Frames that no longer describe a live record.
    dead_frames: usize,
}

/// A local store whose every write is appended to a journal.
///
/// The in-memory index is rebuilt by replaying the journal on open. Each
/// write is one frame, so a crash loses at most the frame being written.
pub struct JournaledLocalStore<B: JournalBackend> {
    config: StoreConfig,
    inner: Mutex<Inner<B>>,
}

impl JournaledLocalStore<FileJournal> {
    /// Opens a store in `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Fails if the directory is locked by another handle or the journal is
    /// corrupted.
    pub fn open_dir(dir: &Path, config: StoreConfig) -> StoreResult<Self> {
        Self::open(FileJournal::open(dir)?, config)
    }
}

impl<B: JournalBackend> JournaledLocalStore<B> {
    /// Opens a store over `backend`, replaying its journal.
    ///
    /// An incomplete trailing frame is truncated away.
    pub fn open(mut backend: B, config: StoreConfig) -> StoreResult<Self> {
        let bytes = backend.read_all()?;
        let replay = Replay::scan(&bytes)?;

        if replay.torn_bytes > 0 {
            tracing::warn!(
                torn_bytes = replay.torn_bytes,
                valid_len = replay.valid_len,
                "discarding incomplete journal frame"
            );
            backend.truncate(replay.valid_len)?;
        }

        let frames = replay.entries.len();
        let mut index = RecordIndex::default();
        for entry in replay.entries {
            match entry {
                JournalEntry::Put(record) => {
                    index.put(record);
                }
                JournalEntry::Remove(id) => {
                    index.remove(&id);
                }
            }
        }
        let dead_frames = frames.saturating_sub(index.len());
        tracing::debug!(records = index.len(), frames, "replayed journal");

        Ok(Self {
            config,
            inner: Mutex::new(Inner {
                backend,
                index,
                dead_frames,
            }),
        })
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the number of live records.
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of superseded frames in the journal.
    pub fn dead_frames(&self) -> usize {
        self.inner.lock().dead_frames
    }

    /// Returns the journal size in bytes.
    pub fn journal_size(&self) -> u64 {
        self.inner.lock().backend.size()
    }

    /// Rewrites the journal with one frame per live record.
    pub fn compact(&self) -> StoreResult<CompactionStats> {
        let mut inner = self.inner.lock();
        Self::compact_locked(&mut inner)
    }

    fn compact_locked(inner: &mut Inner<B>) -> StoreResult<CompactionStats> {
        let bytes_before = inner.backend.size();
        let mut image = Vec::new();
        let live = inner.index.sorted();
        let records = live.len();
        for record in live {
            image.extend(JournalEntry::Put(record.clone()).encode_frame()?);
        }
        inner.backend.replace(&image)?;
        inner.dead_frames = 0;

        let stats = CompactionStats {
            bytes_before,
            bytes_after: inner.backend.size(),
            records,
        };
        tracing::info!(
            bytes_before = stats.bytes_before,
            bytes_after = stats.bytes_after,
            records,
            "compacted journal"
        );
        Ok(stats)
    }

    /// Builds frames from the current index, appends them, then applies
    /// them to the index. Returns the number of frames written.
    ///
    /// The lock is held throughout, so each call is atomic. A failed append or
    /// sync is cut back to the previous journal size, leaving both journal and
    /// index as they were. If the cut itself fails, the frames stay in the
    /// journal and are applied to the index so a reopen shows the same state.
    fn write_with<F>(&self, build: F) -> StoreResult<usize>
    where
        F: FnOnce(&RecordIndex) -> StoreResult<Vec<JournalEntry>>,
    {
        let mut inner = self.inner.lock();
        let entries = build(&inner.index)?;
        let written = entries.len();
        if written == 0 {
            return Ok(0);
        }

        let mut buf = Vec::new();
        for entry in &entries {
            buf.extend(entry.encode_frame()?);
        }

        let before = inner.backend.size();
        let mut result = inner.backend.append(&buf);
        if result.is_ok() && self.config.sync_on_write {
            result = inner.backend.sync();
        }
        if let Err(e) = result {
            if inner.backend.size() == before {
                return Err(e);
            }
            match inner.backend.truncate(before) {
                Ok(()) => return Err(e),
                Err(cut) => {
                    tracing::error!(
                        error = %e,
                        truncate_error = %cut,
                        "journal write failed and could not be rolled back"
                    );
                    Self::apply(&mut inner, entries);
                    return Err(e);
                }
            }
        }

        Self::apply(&mut inner, entries);

        let threshold = self.config.compact_threshold;
        if threshold > 0 && inner.dead_frames >= threshold {
            if let Err(e) = Self::compact_locked(&mut inner) {
                tracing::warn!(
                    error = %e,
                    dead_frames = inner.dead_frames,
                    "automatic compaction failed"
                );
            }
        }
        Ok(written)
    }

    fn apply(inner: &mut Inner<B>, entries: Vec<JournalEntry>) {
        for entry in entries {
            match entry {
                JournalEntry::Put(record) => {
                    if inner.index.put(record) {
                        inner.dead_frames += 1;
                    }
                }
                JournalEntry::Remove(id) => {
                    // both the removed image and the tombstone frame are dead
                    let removed = inner.index.remove(&id);
                    inner.dead_frames += if removed { 2 } else { 1 };
                }
            }
        }
    }
}

impl<B: JournalBackend> LocalStore for JournaledLocalStore<B> {
    fn get(&self, id: &RecordId) -> StoreResult<Option<SyncableRecord>> {
        Ok(self.inner.lock().index.get(id).cloned())
    }

    fn list_for_owner(&self, owner: &OwnerId) -> StoreResult<Vec<SyncableRecord>> {
        Ok(self.inner.lock().index.for_owner(owner))
    }

    fn list_pending(&self, owner: &OwnerId) -> StoreResult<Vec<SyncableRecord>> {
        Ok(self.inner.lock().index.pending(owner))
    }

    fn upsert(&self, record: SyncableRecord) -> StoreResult<()> {
        self.write_with(|_| Ok(vec![JournalEntry::Put(record)]))?;
        Ok(())
    }

    fn upsert_many(&self, records: Vec<SyncableRecord>) -> StoreResult<()> {
        self.write_with(|_| Ok(records.into_iter().map(JournalEntry::Put).collect()))?;
        Ok(())
    }

    fn upsert_if_unchanged(
        &self,
        record: SyncableRecord,
        expected_modified_at: Option<Timestamp>,
    ) -> StoreResult<bool> {
        let written = self.write_with(|index| {
            Ok(if index.modified_at(&record.id) == expected_modified_at {
                vec![JournalEntry::Put(record)]
            } else {
                Vec::new()
            })
        })?;
        Ok(written > 0)
    }

    fn mark_synced(
        &self,
        id: &RecordId,
        pushed_modified_at: Timestamp,
        synced_at: Timestamp,
    ) -> StoreResult<bool> {
        let written = self.write_with(|index| {
            Ok(index
                .synced_copy(id, pushed_modified_at, synced_at)?
                .map(JournalEntry::Put)
                .into_iter()
                .collect())
        })?;
        Ok(written > 0)
    }

    fn latest_modified_at(&self, owner: &OwnerId) -> StoreResult<Timestamp> {
        Ok(self.inner.lock().index.latest_modified_at(owner))
    }

    fn purge(&self, id: &RecordId) -> StoreResult<bool> {
        let written = self.write_with(|index| {
            Ok(match index.get(id) {
                Some(_) => vec![JournalEntry::Remove(id.clone())],
                None => Vec::new(),
            })
        })?;
        Ok(written > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{JournalBackend, MemoryJournal};
    use crate::error::StoreError;
    use crate::local::LocalWrites;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn no_compaction() -> StoreConfig {
        StoreConfig::new().with_compact_threshold(0)
    }

    #[derive(Debug, Default)]
    struct Faults {
        /// Next append writes this many bytes, then fails.
        partial_append: Option<usize>,
        fail_sync: bool,
        fail_truncate: bool,
        fail_replace: bool,
    }

    /// A memory journal with switchable I/O failures.
    #[derive(Debug, Clone, Default)]
    struct FaultyJournal {
        journal: MemoryJournal,
        faults: Arc<parking_lot::Mutex<Faults>>,
    }

    fn io_failure(what: &str) -> StoreError {
        StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, what.to_string()))
    }

    impl JournalBackend for FaultyJournal {
        fn read_all(&mut self) -> StoreResult<Vec<u8>> {
            self.journal.read_all()
        }

        fn append(&mut self, data: &[u8]) -> StoreResult<()> {
            let partial = self.faults.lock().partial_append.take();
            match partial {
                Some(n) => {
                    self.journal.append(&data[..n.min(data.len())])?;
                    Err(io_failure("disk full"))
                }
                None => self.journal.append(data),
            }
        }

        fn sync(&mut self) -> StoreResult<()> {
            if self.faults.lock().fail_sync {
                return Err(io_failure("fsync failed"));
            }
            self.journal.sync()
        }

        fn truncate(&mut self, len: u64) -> StoreResult<()> {
            if self.faults.lock().fail_truncate {
                return Err(io_failure("truncate failed"));
            }
            self.journal.truncate(len)
        }

        fn replace(&mut self, contents: &[u8]) -> StoreResult<()> {
            if self.faults.lock().fail_replace {
                return Err(io_failure("rename failed"));
            }
            self.journal.replace(contents)
        }

        fn size(&self) -> u64 {
            self.journal.size()
        }
    }

    #[test]
    fn reopen_replays_journal() {
        let journal = MemoryJournal::new();
        let owner = OwnerId::from("alice");
        let id = {
            let store = JournaledLocalStore::open(journal.clone(), no_compaction()).unwrap();
            let record = store.create_record(&owner, b"v1".to_vec(), 100).unwrap();
            let edited = store.edit_record(&record.id, b"v2".to_vec(), 200).unwrap();
            assert!(store.mark_synced(&record.id, edited.last_modified_at, 250).unwrap());
            record.id
        };

        let store = JournaledLocalStore::open(journal, no_compaction()).unwrap();
        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.payload, b"v2");
        assert_eq!(record.last_synced_at, 250);
        assert!(!record.pending_sync());
        assert_eq!(store.dead_frames(), 2);
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let journal = MemoryJournal::new();
        {
            let store = JournaledLocalStore::open(journal.clone(), no_compaction()).unwrap();
            store.create_record(&"o".into(), b"one".to_vec(), 1).unwrap();
            store.create_record(&"o".into(), b"two".to_vec(), 2).unwrap();
        }
        let full = journal.bytes();
        let mut cut = journal.clone();
        cut.truncate(full.len() as u64 - 5).unwrap();

        let store = JournaledLocalStore::open(journal.clone(), no_compaction()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(journal.size() < full.len() as u64 - 5);

        // the store keeps working after recovery
        store.create_record(&"o".into(), b"three".to_vec(), 3).unwrap();
        drop(store);
        let store = JournaledLocalStore::open(journal, no_compaction()).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn corruption_refuses_to_open() {
        let journal = MemoryJournal::new();
        {
            let store = JournaledLocalStore::open(journal.clone(), no_compaction()).unwrap();
            store.create_record(&"o".into(), b"payload".to_vec(), 1).unwrap();
        }
        let mut bytes = journal.bytes();
        bytes[14] ^= 0x55;

        let result = JournaledLocalStore::open(MemoryJournal::from_bytes(bytes), no_compaction());
        assert!(matches!(result, Err(StoreError::Corrupted(_))));
    }

    #[test]
    fn damaged_length_refuses_to_open_and_keeps_journal() {
        let journal = MemoryJournal::new();
        {
            let store = JournaledLocalStore::open(journal.clone(), no_compaction()).unwrap();
            for i in 0..3u8 {
                store.create_record(&"o".into(), vec![i; 32], u64::from(i) + 1).unwrap();
            }
        }
        let mut bytes = journal.bytes();
        let len = bytes.len();
        // high byte of the first frame's payload length
        bytes[10] = 0x7F;

        let damaged = MemoryJournal::from_bytes(bytes);
        let result = JournaledLocalStore::open(damaged.clone(), no_compaction());
        assert!(matches!(result, Err(StoreError::Corrupted(_))));
        assert_eq!(damaged.size(), len as u64);
    }

    #[test]
    fn partial_append_is_rolled_back() {
        let backend = FaultyJournal::default();
        let store = JournaledLocalStore::open(backend.clone(), no_compaction()).unwrap();
        let kept = store.create_record(&"o".into(), b"kept".to_vec(), 1).unwrap();
        let size = store.journal_size();

        backend.faults.lock().partial_append = Some(7);
        assert!(store.create_record(&"o".into(), b"lost".to_vec(), 2).is_err());
        assert_eq!(store.journal_size(), size);
        assert_eq!(store.len(), 1);

        let later = store.create_record(&"o".into(), b"later".to_vec(), 3).unwrap();
        drop(store);
        let store = JournaledLocalStore::open(backend.journal.clone(), no_compaction()).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get(&kept.id).unwrap().is_some());
        assert!(store.get(&later.id).unwrap().is_some());
    }

    #[test]
    fn failed_sync_leaves_no_write_behind() {
        let backend = FaultyJournal::default();
        let store = JournaledLocalStore::open(backend.clone(), StoreConfig::default()).unwrap();
        let record = store.create_record(&"o".into(), b"v1".to_vec(), 1).unwrap();
        let size = store.journal_size();

        backend.faults.lock().fail_sync = true;
        assert!(store.edit_record(&record.id, b"v2".to_vec(), 2).is_err());
        assert_eq!(store.journal_size(), size);
        assert_eq!(store.get(&record.id).unwrap().unwrap().payload, b"v1");
        drop(store);

        let store = JournaledLocalStore::open(backend.journal.clone(), no_compaction()).unwrap();
        assert_eq!(store.get(&record.id).unwrap().unwrap().payload, b"v1");
    }

    #[test]
    fn unrecoverable_sync_failure_keeps_index_matching_journal() {
        let backend = FaultyJournal::default();
        let store = JournaledLocalStore::open(backend.clone(), StoreConfig::default()).unwrap();
        let record = store.create_record(&"o".into(), b"v1".to_vec(), 1).unwrap();

        {
            let mut faults = backend.faults.lock();
            faults.fail_sync = true;
            faults.fail_truncate = true;
        }
        assert!(store.edit_record(&record.id, b"v2".to_vec(), 2).is_err());
        assert_eq!(store.get(&record.id).unwrap().unwrap().payload, b"v2");
        drop(store);

        let store = JournaledLocalStore::open(backend.journal.clone(), no_compaction()).unwrap();
        assert_eq!(store.get(&record.id).unwrap().unwrap().payload, b"v2");
    }

    #[test]
    fn failed_compaction_does_not_fail_the_write() {
        let backend = FaultyJournal::default();
        let store = JournaledLocalStore::open(
            backend.clone(),
            StoreConfig::new().with_compact_threshold(1),
        )
        .unwrap();
        let record = store.create_record(&"o".into(), vec![0], 1).unwrap();

        backend.faults.lock().fail_replace = true;
        let edited = store.edit_record(&record.id, vec![1], 2).unwrap();
        assert!(store.mark_synced(&record.id, edited.last_modified_at, 3).unwrap());
        assert_eq!(store.dead_frames(), 2);
        assert!(!store.get(&record.id).unwrap().unwrap().pending_sync());

        backend.faults.lock().fail_replace = false;
        store.edit_record(&record.id, vec![2], 4).unwrap();
        assert_eq!(store.dead_frames(), 0);
    }

    #[test]
    fn confirmation_of_stale_push_writes_nothing() {
        let journal = MemoryJournal::new();
        let store = JournaledLocalStore::open(journal.clone(), no_compaction()).unwrap();
        let pushed = store.create_record(&"o".into(), b"v1".to_vec(), 10).unwrap();
        store.edit_record(&pushed.id, b"v2".to_vec(), 20).unwrap();
        let size = store.journal_size();

        assert!(!store.mark_synced(&pushed.id, pushed.last_modified_at, 30).unwrap());
        assert_eq!(store.journal_size(), size);
        assert!(store.get(&pushed.id).unwrap().unwrap().pending_sync());

        let accepted = SyncableRecord::with_id(pushed.id.clone(), "o".into(), b"r".to_vec(), 40);
        assert!(!store
            .upsert_if_unchanged(accepted.clone(), Some(pushed.last_modified_at))
            .unwrap());
        assert!(store.upsert_if_unchanged(accepted, Some(20)).unwrap());
        assert_eq!(store.get(&pushed.id).unwrap().unwrap().payload, b"r");
    }

    #[test]
    fn purge_survives_reopen() {
        let journal = MemoryJournal::new();
        let id = {
            let store = JournaledLocalStore::open(journal.clone(), no_compaction()).unwrap();
            let record = store.create_record(&"o".into(), vec![1], 1).unwrap();
            assert!(store.purge(&record.id).unwrap());
            assert!(!store.purge(&record.id).unwrap());
            record.id
        };
        let store = JournaledLocalStore::open(journal, no_compaction()).unwrap();
        assert!(store.get(&id).unwrap().is_none());
        assert_eq!(store.dead_frames(), 2);
    }

    #[test]
    fn compaction_keeps_live_records() {
        let journal = MemoryJournal::new();
        let store = JournaledLocalStore::open(journal.clone(), no_compaction()).unwrap();
        let owner = OwnerId::from("o");
        let record = store.create_record(&owner, vec![0], 1).unwrap();
        for i in 1..10u8 {
            store.edit_record(&record.id, vec![i], u64::from(i) + 1).unwrap();
        }
        let other = store.create_record(&owner, vec![42], 50).unwrap();
        store.purge(&other.id).unwrap();

        let stats = store.compact().unwrap();
        assert_eq!(stats.records, 1);
        assert!(stats.bytes_after < stats.bytes_before);
        assert_eq!(store.dead_frames(), 0);

        drop(store);
        let store = JournaledLocalStore::open(journal, no_compaction()).unwrap();
        assert_eq!(store.get(&record.id).unwrap().unwrap().payload, vec![9]);
        assert!(store.get(&other.id).unwrap().is_none());
    }

    #[test]
    fn automatic_compaction_at_threshold() {
        let store = JournaledLocalStore::open(
            MemoryJournal::new(),
            StoreConfig::new().with_compact_threshold(3),
        )
        .unwrap();
        let record = store.create_record(&"o".into(), vec![0], 1).unwrap();
        store.edit_record(&record.id, vec![1], 2).unwrap();
        store.edit_record(&record.id, vec![2], 3).unwrap();
        assert_eq!(store.dead_frames(), 2);
        store.edit_record(&record.id, vec![3], 4).unwrap();
        assert_eq!(store.dead_frames(), 0);
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let owner = OwnerId::from("alice");
        {
            let store = JournaledLocalStore::open_dir(dir.path(), StoreConfig::default()).unwrap();
            store
                .upsert_many(vec![
                    SyncableRecord::with_id("a".into(), owner.clone(), vec![1], 10),
                    SyncableRecord::with_id("b".into(), owner.clone(), vec![2], 20),
                ])
                .unwrap();
            assert!(matches!(
                JournaledLocalStore::open_dir(dir.path(), StoreConfig::default()),
                Err(StoreError::Locked(_))
            ));
        }
        let store = JournaledLocalStore::open_dir(dir.path(), StoreConfig::default()).unwrap();
        let pending: Vec<_> = store
            .list_pending(&owner)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(pending, vec!["a".into(), "b".into()]);
        assert_eq!(store.latest_modified_at(&owner).unwrap(), 20);
    }
}
