//! The application-facing sync facade.

use crate::conditions::{DeviceConditions, Trigger};
use crate::config::SchedulerConfig;
use crate::error::SyncResult;
use crate::progress::SyncProgress;
use crate::scheduler::{RequestOutcome, SchedulerBuilder, SyncScheduler};
use crate::status::{SchedulerStats, SyncFailure};
use crate::syncable::Syncable;
use driftsync_protocol::{Clock, OwnerId};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;

/// Builder for [`SyncManager`].
pub struct SyncManagerBuilder {
    owner: OwnerId,
    scheduler: SchedulerBuilder,
}

impl SyncManagerBuilder {
    /// Sets the precondition source.
    pub fn with_conditions(mut self, conditions: Arc<dyn DeviceConditions>) -> Self {
        self.scheduler = self.scheduler.with_conditions(conditions);
        self
    }

    /// Sets the scheduler configuration.
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = self.scheduler.with_config(config);
        self
    }

    /// Sets the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.scheduler = self.scheduler.with_clock(clock);
        self
    }

    /// Sets the runtime jobs run on.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.scheduler = self.scheduler.with_runtime(runtime);
        self
    }

    /// Builds the manager.
    ///
    /// # Errors
    ///
    /// Fails if no runtime is available.
    pub fn build(self) -> SyncResult<SyncManager> {
        Ok(SyncManager {
            owner: self.owner,
            scheduler: self.scheduler.build()?,
        })
    }
}

/// Sync facade bound to the signed-in owner.
///
/// Cheap to clone; clones share one scheduler and one status.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use driftsync_engine::{MemoryRemoteStore, SyncManager, SyncOrchestrator};
/// # use driftsync_store::MemoryLocalStore;
/// # async fn demo() -> driftsync_engine::SyncResult<()> {
/// let orchestrator = SyncOrchestrator::new(
///     Arc::new(MemoryLocalStore::new()),
///     Arc::new(MemoryRemoteStore::new()),
/// );
/// let manager = SyncManager::builder(Arc::new(orchestrator), "alice".into()).build()?;
/// manager.request_sync();
/// manager.wait_idle().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SyncManager {
    owner: OwnerId,
    scheduler: SyncScheduler,
}

impl SyncManager {
    /// Starts a builder syncing `syncable` for `owner`.
    pub fn builder(syncable: Arc<dyn Syncable>, owner: OwnerId) -> SyncManagerBuilder {
        SyncManagerBuilder {
            owner,
            scheduler: SyncScheduler::builder(syncable),
        }
    }

    /// Returns the bound owner.
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Returns the underlying scheduler.
    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    /// Returns true while a sync job is in flight.
    pub fn is_syncing(&self) -> bool {
        self.scheduler.status().is_syncing()
    }

    /// Subscribes to the syncing flag.
    pub fn watch_syncing(&self) -> watch::Receiver<bool> {
        self.scheduler.status().watch_syncing()
    }

    /// Subscribes to progress ticks of the running job.
    pub fn watch_progress(&self) -> watch::Receiver<Option<SyncProgress>> {
        self.scheduler.status().watch_progress()
    }

    /// Requests an on-demand sync for the bound owner.
    ///
    /// Returns immediately. Concurrent requests coalesce into one job.
    pub fn request_sync(&self) -> RequestOutcome {
        self.scheduler.request(&self.owner, Trigger::OnDemand)
    }

    /// Requests a sync for another owner, e.g. after account switching.
    pub fn request_sync_for(&self, owner: &OwnerId, trigger: Trigger) -> RequestOutcome {
        self.scheduler.request(owner, trigger)
    }

    /// Takes the last terminal job failure.
    pub fn take_failure(&self) -> Option<SyncFailure> {
        self.scheduler.status().take_failure()
    }

    /// Returns job counters.
    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.status().stats()
    }

    /// Schedules background syncs for the bound owner.
    pub fn start_periodic(&self, interval: Duration) -> bool {
        self.scheduler.start_periodic(&self.owner, interval)
    }

    /// Stops background syncs for the bound owner.
    pub fn stop_periodic(&self) -> bool {
        self.scheduler.stop_periodic(&self.owner)
    }

    /// Waits until no job is in flight.
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    /// Stops all jobs and background syncs.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}
