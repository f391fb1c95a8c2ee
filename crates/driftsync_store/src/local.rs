//! The local store contract.

use crate::error::{StoreError, StoreResult};
use driftsync_protocol::{OwnerId, RecordId, SyncableRecord, Timestamp};

/// The device-local persistent store.
///
/// This is the source of truth for the application. The sync orchestrator
/// reads pending changes from it and writes reconciled records back.
///
/// # Invariants
///
/// - Every method is atomic for a single record
/// - `upsert_many` is not transactional across records; a partial failure
///   leaves earlier records written
/// - `list_pending` returns records ascending by `last_modified_at`
/// - Implementations serialize concurrent writers internally
pub trait LocalStore: Send + Sync {
    /// Returns the record with the given identifier, if present.
    fn get(&self, id: &RecordId) -> StoreResult<Option<SyncableRecord>>;

    /// Returns every record of `owner`, newest first.
    ///
    /// Soft-deleted records are included.
    fn list_for_owner(&self, owner: &OwnerId) -> StoreResult<Vec<SyncableRecord>>;

    /// Returns the records of `owner` awaiting a push, oldest first.
    fn list_pending(&self, owner: &OwnerId) -> StoreResult<Vec<SyncableRecord>>;

    /// Creates or replaces a record by identifier.
    fn upsert(&self, record: SyncableRecord) -> StoreResult<()>;

    /// Creates or replaces several records.
    ///
    /// # Errors
    ///
    /// Stops at the first failing record; earlier records stay written.
    fn upsert_many(&self, records: Vec<SyncableRecord>) -> StoreResult<()> {
        for record in records {
            self.upsert(record)?;
        }
        Ok(())
    }

    /// Writes `record` only if the stored copy still has the modification
    /// stamp `expected_modified_at` (`None`: the record must be absent).
    ///
    /// The check and the write happen under one lock. Returns false, writing
    /// nothing, when the stored copy changed in between.
    fn upsert_if_unchanged(
        &self,
        record: SyncableRecord,
        expected_modified_at: Option<Timestamp>,
    ) -> StoreResult<bool>;

    /// Confirms a push: clears the pending action of a record and stamps its
    /// sync time, provided the record still carries `pushed_modified_at`.
    ///
    /// Returns false, leaving the record pending and untouched, when it was
    /// modified after the pushed copy was read.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record does not exist.
    fn mark_synced(
        &self,
        id: &RecordId,
        pushed_modified_at: Timestamp,
        synced_at: Timestamp,
    ) -> StoreResult<bool>;

    /// Returns the greatest `last_modified_at` among the owner's records.
    ///
    /// Returns `0` when the owner has no records.
    fn latest_modified_at(&self, owner: &OwnerId) -> StoreResult<Timestamp>;

    /// Physically removes a record.
    ///
    /// Returns true if the record existed.
    fn purge(&self, id: &RecordId) -> StoreResult<bool>;
}

/// Application-side mutations.
///
/// These are the only writes an application should issue; they keep the
/// pending action consistent with the change so the next sync pushes it.
pub trait LocalWrites: LocalStore {
    /// Creates a new record for `owner` and queues it for push.
    fn create_record(
        &self,
        owner: &OwnerId,
        payload: Vec<u8>,
        now: Timestamp,
    ) -> StoreResult<SyncableRecord> {
        let record = SyncableRecord::create(owner.clone(), payload, now);
        self.upsert(record.clone())?;
        tracing::debug!(owner = %owner, record = %record.id, "created record");
        Ok(record)
    }

    /// Replaces the payload of an existing record and queues it for push.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown records and
    /// [`StoreError::Invariant`] for soft-deleted ones.
    fn edit_record(
        &self,
        id: &RecordId,
        payload: Vec<u8>,
        now: Timestamp,
    ) -> StoreResult<SyncableRecord> {
        let mut record = self
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.update(payload, now)?;
        self.upsert(record.clone())?;
        tracing::debug!(record = %id, modified_at = record.last_modified_at, "edited record");
        Ok(record)
    }

    /// Soft-deletes a record and queues the delete for push.
    ///
    /// Returns false if the record was already deleted.
    fn delete_record(&self, id: &RecordId, now: Timestamp) -> StoreResult<bool> {
        let mut record = self
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if !record.soft_delete(now) {
            return Ok(false);
        }
        self.upsert(record)?;
        tracing::debug!(record = %id, "soft-deleted record");
        Ok(true)
    }
}

impl<S: LocalStore + ?Sized> LocalWrites for S {}
