//! The extension point the scheduler drives.

use crate::cancel::CancelToken;
use crate::error::SyncResult;
use crate::orchestrator::SyncOrchestrator;
use crate::progress::SyncProgress;
use crate::remote::RemoteStore;
use driftsync_protocol::{OwnerId, Timestamp};
use driftsync_store::LocalStore;

/// A boxed progress stream.
pub type SyncStream = Box<dyn Iterator<Item = SyncResult<SyncProgress>> + Send>;

/// A data-owning component that can be synced.
///
/// `sync` must return a fresh, lazy stream per call; the scheduler iterates
/// it on a blocking worker thread.
pub trait Syncable: Send + Sync {
    /// Opens a sync run for `owner`.
    fn sync(&self, owner: &OwnerId, cancel: CancelToken) -> SyncStream;

    /// Hard-deletes confirmed soft deletes synced before `older_than`.
    ///
    /// Components without tombstones keep the default.
    fn purge_tombstones(&self, _owner: &OwnerId, _older_than: Timestamp) -> SyncResult<usize> {
        Ok(0)
    }
}

impl<L, R> Syncable for SyncOrchestrator<L, R>
where
    L: LocalStore + 'static,
    R: RemoteStore + 'static,
{
    fn sync(&self, owner: &OwnerId, cancel: CancelToken) -> SyncStream {
        Box::new(self.sync_with_cancel(owner, cancel))
    }

    fn purge_tombstones(&self, owner: &OwnerId, older_than: Timestamp) -> SyncResult<usize> {
        self.purge_confirmed_deletes(owner, older_than)
    }
}
