//! Syncable records.

use crate::clock::{next_modified_at, Timestamp};
use crate::codec::{from_cbor, to_cbor};
use crate::error::{CodecResult, InvariantViolation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, globally unique record identifier.
///
/// Identifiers are client-generated (UUID v4 text for locally created
/// records), shared verbatim between local and remote copies, and never
/// reused or mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of the principal that owns a record.
///
/// Remote queries are partitioned by owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Creates an owner identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The operation to replay against the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    /// Nothing to push; the record matches the remote copy.
    #[default]
    None,
    /// Create or replace the remote copy.
    Upsert,
    /// Propagate a soft delete.
    Delete,
}

impl PendingAction {
    /// Converts to a numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            PendingAction::None => 0,
            PendingAction::Upsert => 1,
            PendingAction::Delete => 2,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PendingAction::None),
            1 => Some(PendingAction::Upsert),
            2 => Some(PendingAction::Delete),
            _ => None,
        }
    }
}

/// The unit of synchronization.
///
/// The payload is opaque to the engine. Ordering between conflicting writes
/// uses `last_modified_at` only.
///
/// Whether a record awaits a push is derived from `pending_action`
/// (see [`SyncableRecord::pending_sync`]), so "pending" and "has an action"
/// cannot disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncableRecord {
    /// Stable identifier.
    pub id: RecordId,
    /// Owning principal.
    pub owner_id: OwnerId,
    /// Domain payload.
    pub payload: Vec<u8>,
    /// Last local or remote modification (ms since epoch).
    pub last_modified_at: Timestamp,
    /// Last confirmed reconciliation; `0` means never synced.
    pub last_synced_at: Timestamp,
    /// Soft-delete flag.
    pub deleted: bool,
    /// Operation to replay against the remote store.
    pub pending_action: PendingAction,
}

impl SyncableRecord {
    /// Creates a new local record with a generated identifier.
    pub fn create(owner_id: OwnerId, payload: Vec<u8>, now: Timestamp) -> Self {
        Self::with_id(RecordId::generate(), owner_id, payload, now)
    }

    /// Creates a new local record with the given identifier.
    pub fn with_id(id: RecordId, owner_id: OwnerId, payload: Vec<u8>, now: Timestamp) -> Self {
        Self {
            id,
            owner_id,
            payload,
            last_modified_at: now,
            last_synced_at: 0,
            deleted: false,
            pending_action: PendingAction::Upsert,
        }
    }

    /// Returns true while a local change awaits remote confirmation.
    pub fn pending_sync(&self) -> bool {
        self.pending_action != PendingAction::None
    }

    /// Returns true once the record has been reconciled at least once.
    pub fn ever_synced(&self) -> bool {
        self.last_synced_at > 0
    }

    /// Replaces the payload as a local mutation.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantViolation::AlreadyDeleted`] for soft-deleted records.
    pub fn update(&mut self, payload: Vec<u8>, now: Timestamp) -> Result<(), InvariantViolation> {
        if self.deleted {
            return Err(InvariantViolation::AlreadyDeleted(self.id.clone()));
        }
        self.payload = payload;
        self.last_modified_at = next_modified_at(self.last_modified_at, now);
        self.pending_action = PendingAction::Upsert;
        Ok(())
    }

    /// Soft-deletes the record as a local mutation.
    ///
    /// Returns false if the record was already deleted.
    pub fn soft_delete(&mut self, now: Timestamp) -> bool {
        if self.deleted {
            return false;
        }
        self.deleted = true;
        self.last_modified_at = next_modified_at(self.last_modified_at, now);
        self.pending_action = PendingAction::Delete;
        true
    }

    /// Records a confirmed push.
    pub fn mark_synced(&mut self, synced_at: Timestamp) {
        self.pending_action = PendingAction::None;
        self.last_synced_at = synced_at;
    }

    /// Turns a pulled remote copy into its local form.
    ///
    /// The result has no pending action and counts as synced at its own
    /// modification time.
    pub fn accept_remote(mut self) -> Self {
        self.pending_action = PendingAction::None;
        self.last_synced_at = self.last_modified_at;
        self
    }

    /// Re-queues a record whose change was never confirmed.
    ///
    /// A non-pending record with `last_modified_at > last_synced_at` missed its
    /// confirmation. Returns true if the record was re-queued.
    pub fn requeue_if_unconfirmed(&mut self) -> bool {
        if self.pending_sync() || self.last_modified_at <= self.last_synced_at {
            return false;
        }
        self.pending_action = if self.deleted {
            PendingAction::Delete
        } else {
            PendingAction::Upsert
        };
        true
    }

    /// Returns true for a confirmed soft delete that may be physically purged.
    pub fn is_purgeable(&self) -> bool {
        self.deleted && self.pending_action == PendingAction::None
    }

    /// Checks the metadata invariants.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        if self.id.as_str().is_empty() {
            return Err(InvariantViolation::EmptyId);
        }
        if self.deleted && self.pending_action == PendingAction::Upsert {
            return Err(InvariantViolation::DeleteNotQueued(self.id.clone()));
        }
        if !self.pending_sync() && self.last_modified_at > self.last_synced_at {
            return Err(InvariantViolation::UnconfirmedChange {
                id: self.id.clone(),
                modified_at: self.last_modified_at,
                synced_at: self.last_synced_at,
            });
        }
        Ok(())
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}
