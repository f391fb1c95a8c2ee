//! Conflict resolution between a pulled record and its local copy.
//!
//! The policy is a flat last-writer-wins on `last_modified_at`:
//!
//! - no local copy, or a local copy with nothing pending: the remote wins
//! - the remote is strictly newer than a pending local change: the remote wins
//! - otherwise (including exact ties) the local pending change wins and the
//!   incoming write is discarded; the next push overwrites the remote
//!
//! There is no causal ordering and no per-field merge. Two offline writers
//! editing different fields of the same record lose one of the edits.

use crate::clock::Timestamp;
use crate::record::{RecordId, SyncableRecord};
use serde::{Deserialize, Serialize};

/// Outcome of reconciling one pulled record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Keep the local version; the remote write is discarded.
    KeepLocal,
    /// Overwrite the local copy with the remote version.
    AcceptRemote,
}

/// Decides which side of a pulled record wins.
pub fn resolve(local: Option<&SyncableRecord>, remote: &SyncableRecord) -> ConflictResolution {
    match local {
        None => ConflictResolution::AcceptRemote,
        Some(local) if !local.pending_sync() => ConflictResolution::AcceptRemote,
        Some(local) if remote.last_modified_at > local.last_modified_at => {
            ConflictResolution::AcceptRemote
        }
        Some(_) => ConflictResolution::KeepLocal,
    }
}

/// A pulled record that collided with a pending local change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Record involved.
    pub record_id: RecordId,
    /// Local modification time when the conflict was seen.
    pub local_modified_at: Timestamp,
    /// Incoming remote modification time.
    pub remote_modified_at: Timestamp,
    /// How it was resolved.
    pub resolution: ConflictResolution,
}

impl Conflict {
    /// Builds a conflict entry if `local` had a pending change.
    ///
    /// Returns `None` when there was nothing local to lose.
    pub fn detect(
        local: Option<&SyncableRecord>,
        remote: &SyncableRecord,
        resolution: ConflictResolution,
    ) -> Option<Self> {
        let local = local.filter(|l| l.pending_sync())?;
        Some(Self {
            record_id: remote.id.clone(),
            local_modified_at: local.last_modified_at,
            remote_modified_at: remote.last_modified_at,
            resolution,
        })
    }

    /// Returns true if the local pending change was overwritten.
    pub fn local_change_lost(&self) -> bool {
        self.resolution == ConflictResolution::AcceptRemote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PendingAction;
    use proptest::prelude::*;

    fn at(modified: Timestamp, action: PendingAction) -> SyncableRecord {
        let mut r = SyncableRecord::with_id("a".into(), "o".into(), vec![1], modified);
        r.pending_action = action;
        if action == PendingAction::None {
            r.last_synced_at = modified;
        }
        r
    }

    #[test]
    fn absent_local_accepts_remote() {
        let remote = at(50, PendingAction::None);
        assert_eq!(resolve(None, &remote), ConflictResolution::AcceptRemote);
        assert!(Conflict::detect(None, &remote, ConflictResolution::AcceptRemote).is_none());
    }

    #[test]
    fn clean_local_accepts_older_remote() {
        let local = at(100, PendingAction::None);
        let remote = at(50, PendingAction::None);
        assert_eq!(resolve(Some(&local), &remote), ConflictResolution::AcceptRemote);
    }

    #[test]
    fn pending_local_newer_wins() {
        let local = at(100, PendingAction::Upsert);
        let remote = at(50, PendingAction::None);
        let resolution = resolve(Some(&local), &remote);
        assert_eq!(resolution, ConflictResolution::KeepLocal);

        let conflict = Conflict::detect(Some(&local), &remote, resolution).unwrap();
        assert_eq!(conflict.local_modified_at, 100);
        assert_eq!(conflict.remote_modified_at, 50);
        assert!(!conflict.local_change_lost());
    }

    #[test]
    fn tie_keeps_local() {
        let local = at(100, PendingAction::Delete);
        let remote = at(100, PendingAction::None);
        assert_eq!(resolve(Some(&local), &remote), ConflictResolution::KeepLocal);
    }

    #[test]
    fn strictly_newer_remote_overwrites_pending() {
        let local = at(100, PendingAction::Upsert);
        let remote = at(150, PendingAction::None);
        let resolution = resolve(Some(&local), &remote);
        assert_eq!(resolution, ConflictResolution::AcceptRemote);
        assert!(Conflict::detect(Some(&local), &remote, resolution)
            .unwrap()
            .local_change_lost());
    }

    proptest! {
        #[test]
        fn pending_local_survives_unless_remote_strictly_newer(
            local_ts in 0u64..10_000,
            remote_ts in 0u64..10_000,
        ) {
            let local = at(local_ts, PendingAction::Upsert);
            let remote = at(remote_ts, PendingAction::None);
            let expected = if remote_ts > local_ts {
                ConflictResolution::AcceptRemote
            } else {
                ConflictResolution::KeepLocal
            };
            prop_assert_eq!(resolve(Some(&local), &remote), expected);
        }
    }
}
