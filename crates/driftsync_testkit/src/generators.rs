//! Property-based test generators using proptest.
//!
//! Generated records always satisfy the metadata invariants.

use driftsync_protocol::{OwnerId, PendingAction, RecordId, SyncableRecord, Timestamp};
use proptest::prelude::*;

/// Strategy for owner identifiers drawn from a small pool, so collisions happen.
pub fn owner_strategy() -> impl Strategy<Value = OwnerId> {
    prop::sample::select(vec!["alice", "bob", "carol"]).prop_map(OwnerId::from)
}

/// Strategy for record identifiers from a small pool.
pub fn record_id_strategy() -> impl Strategy<Value = RecordId> {
    (0u8..16).prop_map(|n| RecordId::from(format!("rec-{n:02}")))
}

/// Strategy for opaque payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for plausible modification times.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    1u64..1_000_000
}

/// Strategy for pending actions.
pub fn pending_action_strategy() -> impl Strategy<Value = PendingAction> {
    prop_oneof![
        Just(PendingAction::None),
        Just(PendingAction::Upsert),
        Just(PendingAction::Delete),
    ]
}

/// Strategy for a valid record of `owner`.
pub fn record_strategy(owner: OwnerId) -> impl Strategy<Value = SyncableRecord> {
    (
        record_id_strategy(),
        payload_strategy(),
        timestamp_strategy(),
        pending_action_strategy(),
    )
        .prop_map(move |(id, payload, modified_at, action)| {
            let mut record = SyncableRecord::with_id(id, owner.clone(), payload, modified_at);
            record.pending_action = action;
            record.deleted = action == PendingAction::Delete;
            if action == PendingAction::None {
                record.last_synced_at = modified_at;
            }
            record
        })
}

/// Strategy for a local copy and an incoming remote copy of the same record.
///
/// The remote copy is in store-of-record form (nothing pending).
pub fn conflict_pair_strategy() -> impl Strategy<Value = (SyncableRecord, SyncableRecord)> {
    (
        record_strategy(OwnerId::from("alice")),
        payload_strategy(),
        timestamp_strategy(),
        any::<bool>(),
    )
        .prop_map(|(local, payload, remote_modified_at, deleted)| {
            let mut remote =
                SyncableRecord::with_id(local.id.clone(), local.owner_id.clone(), payload, remote_modified_at);
            remote.deleted = deleted;
            (local, remote.accept_remote())
        })
}

/// Strategy for a batch of records of one owner with distinct identifiers.
pub fn record_batch_strategy(
    owner: OwnerId,
    max: usize,
) -> impl Strategy<Value = Vec<SyncableRecord>> {
    prop::collection::vec(record_strategy(owner), 0..=max).prop_map(|records| {
        let mut seen = std::collections::HashSet::new();
        records
            .into_iter()
            .filter(|r| seen.insert(r.id.clone()))
            .collect()
    })
}
