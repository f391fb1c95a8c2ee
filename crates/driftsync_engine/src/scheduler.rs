//! Scheduling, preconditions and retry.
//!
//! The scheduler decides when a [`Syncable`] runs:
//!
//! - **Coalescing**: at most one job per owner is in flight; a request for an
//!   owner with a job in flight is absorbed by that job.
//! - **Worker slots**: jobs take a permit before running, so at most
//!   `worker_slots` jobs run at once (one by default).
//! - **Preconditions**: checked before the job starts and after every
//!   progress tick. On-demand jobs wait for them; periodic ticks are skipped.
//! - **Retry**: retryable errors are retried with exponential backoff up to
//!   the trigger's bound; the final failure is recorded on [`SyncStatus`].
//!
//! Runs iterate on the blocking pool so store and remote I/O never occupies
//! an async worker.

use crate::cancel::CancelToken;
use crate::conditions::{AlwaysReady, DeviceConditions, Precondition, Trigger};
use crate::config::{SchedulerConfig, TriggerPolicy};
use crate::error::{SyncError, SyncResult};
use crate::status::{SyncFailure, SyncStatus};
use crate::syncable::Syncable;
use driftsync_protocol::{Clock, OwnerId, SystemClock};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What happened to a sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A new job was started.
    Accepted,
    /// A job for the owner is already in flight; nothing was started.
    Coalesced,
    /// The scheduler is shut down.
    Rejected,
}

enum JobOutcome {
    Completed { ticks: usize, attempts: u32 },
    Skipped(Precondition),
    Failed { error: SyncError, attempts: u32 },
}

struct Inner {
    syncable: Arc<dyn Syncable>,
    conditions: Arc<dyn DeviceConditions>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    status: Arc<SyncStatus>,
    in_flight: Mutex<HashMap<OwnerId, CancelToken>>,
    periodic: Mutex<HashMap<OwnerId, JoinHandle<()>>>,
    slots: Arc<Semaphore>,
    runtime: Handle,
    shutdown: watch::Sender<bool>,
}

/// Frees the owner's in-flight entry when its job ends, even by panic or by
/// the task being dropped unpolled.
struct InFlightGuard {
    inner: Arc<Inner>,
    owner: OwnerId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        in_flight.remove(&self.owner);
        if in_flight.is_empty() {
            self.inner.status.set_syncing(false);
        }
    }
}

/// Builder for [`SyncScheduler`].
pub struct SchedulerBuilder {
    syncable: Arc<dyn Syncable>,
    conditions: Arc<dyn DeviceConditions>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    runtime: Option<Handle>,
}

impl SchedulerBuilder {
    /// Starts a builder for `syncable`.
    pub fn new(syncable: Arc<dyn Syncable>) -> Self {
        Self {
            syncable,
            conditions: Arc::new(AlwaysReady),
            config: SchedulerConfig::default(),
            clock: Arc::new(SystemClock),
            runtime: None,
        }
    }

    /// Sets the precondition source.
    pub fn with_conditions(mut self, conditions: Arc<dyn DeviceConditions>) -> Self {
        self.conditions = conditions;
        self
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the clock used for failure times and tombstone cutoffs.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the runtime jobs are spawned on.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Builds the scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unavailable`] if no runtime was given and the
    /// caller is not inside one.
    pub fn build(self) -> SyncResult<SyncScheduler> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .map_err(|e| SyncError::Unavailable(format!("no tokio runtime: {e}")))?,
        };
        let (shutdown, _) = watch::channel(false);
        let slots = Arc::new(Semaphore::new(self.config.worker_slots.max(1)));
        Ok(SyncScheduler {
            inner: Arc::new(Inner {
                syncable: self.syncable,
                conditions: self.conditions,
                config: self.config,
                clock: self.clock,
                status: Arc::new(SyncStatus::new()),
                in_flight: Mutex::new(HashMap::new()),
                periodic: Mutex::new(HashMap::new()),
                slots,
                runtime,
                shutdown,
            }),
        })
    }
}

/// Runs sync jobs on a tokio runtime.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl SyncScheduler {
    /// Starts a builder for `syncable`.
    pub fn builder(syncable: Arc<dyn Syncable>) -> SchedulerBuilder {
        SchedulerBuilder::new(syncable)
    }

    /// Returns the shared status.
    pub fn status(&self) -> &Arc<SyncStatus> {
        &self.inner.status
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Returns true if a job for `owner` is in flight.
    pub fn is_in_flight(&self, owner: &OwnerId) -> bool {
        self.inner.in_flight.lock().contains_key(owner)
    }

    /// Returns true after [`shutdown`](Self::shutdown).
    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    /// Requests a sync for `owner`.
    ///
    /// Fire-and-forget: the job runs in the background. Safe to call
    /// concurrently; at most one job per owner is started.
    pub fn request(&self, owner: &OwnerId, trigger: Trigger) -> RequestOutcome {
        if self.inner.is_shut_down() {
            return RequestOutcome::Rejected;
        }

        let cancel = {
            let mut in_flight = self.inner.in_flight.lock();
            if in_flight.contains_key(owner) {
                self.inner.status.record_coalesced();
                tracing::debug!(owner = %owner, trigger = %trigger, "sync request coalesced");
                return RequestOutcome::Coalesced;
            }
            let token = CancelToken::new();
            in_flight.insert(owner.clone(), token.clone());
            self.inner.status.set_syncing(true);
            token
        };
        self.inner.status.record_accepted();
        tracing::info!(owner = %owner, trigger = %trigger, "sync job accepted");

        let guard = InFlightGuard {
            inner: Arc::clone(&self.inner),
            owner: owner.clone(),
        };
        let inner = Arc::clone(&self.inner);
        let owner = owner.clone();
        self.inner.runtime.spawn(async move {
            let _guard = guard;
            inner.run_job(owner, trigger, cancel).await;
        });
        RequestOutcome::Accepted
    }

    /// Requests a periodic sync for `owner` every `interval`.
    ///
    /// The first request fires immediately. Replaces an existing loop for the
    /// same owner. Returns false after shutdown.
    pub fn start_periodic(&self, owner: &OwnerId, interval: Duration) -> bool {
        if self.inner.is_shut_down() {
            return false;
        }
        let scheduler = self.clone();
        let target = owner.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        let period = interval.max(Duration::from_millis(1));

        let handle = self.inner.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        scheduler.request(&target, Trigger::Periodic);
                    }
                    _ = shutdown.wait_for(|stopped| *stopped) => break,
                }
            }
        });

        if let Some(previous) = self.inner.periodic.lock().insert(owner.clone(), handle) {
            previous.abort();
        }
        tracing::info!(owner = %owner, interval_ms = period.as_millis() as u64, "periodic sync started");
        true
    }

    /// Stops the periodic loop of `owner`. Returns false if none was running.
    pub fn stop_periodic(&self, owner: &OwnerId) -> bool {
        match self.inner.periodic.lock().remove(owner) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels in-flight jobs, stops periodic loops and rejects new requests.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        for token in self.inner.in_flight.lock().values() {
            token.cancel();
        }
        for (_, handle) in self.inner.periodic.lock().drain() {
            handle.abort();
        }
        self.inner.slots.close();
        tracing::info!("sync scheduler shut down");
    }

    /// Waits until no job is in flight.
    pub async fn wait_idle(&self) {
        let mut syncing = self.inner.status.watch_syncing();
        let _ = syncing.wait_for(|busy| !*busy).await;
    }
}

impl Inner {
    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn policy(&self, trigger: Trigger) -> &TriggerPolicy {
        match trigger {
            Trigger::OnDemand => &self.config.on_demand,
            Trigger::Periodic => &self.config.periodic,
        }
    }

    async fn run_job(self: Arc<Self>, owner: OwnerId, trigger: Trigger, cancel: CancelToken) {
        match self.execute(&owner, trigger, &cancel).await {
            JobOutcome::Completed { ticks, attempts } => {
                self.status.record_completed();
                tracing::info!(owner = %owner, trigger = %trigger, ticks, attempts, "sync job completed");
            }
            JobOutcome::Skipped(precondition) => {
                self.status.record_skipped();
                tracing::info!(owner = %owner, precondition = %precondition, "periodic sync skipped");
            }
            JobOutcome::Failed { error, attempts } => {
                tracing::warn!(owner = %owner, trigger = %trigger, attempts, error = %error, "sync job failed");
                self.status.record_failure(SyncFailure {
                    owner: owner.clone(),
                    trigger,
                    attempts,
                    error: Arc::new(error),
                    failed_at: self.clock.now(),
                });
            }
        }
    }

    async fn execute(&self, owner: &OwnerId, trigger: Trigger, cancel: &CancelToken) -> JobOutcome {
        let policy = self.policy(trigger);
        if let Err(outcome) = self.await_preconditions(owner, policy, cancel).await {
            return outcome;
        }

        let _permit = match Arc::clone(&self.slots).acquire_owned().await {
            Ok(permit) => permit,
            // closed by shutdown while the job waited for a slot
            Err(_) => {
                return JobOutcome::Failed {
                    error: SyncError::Cancelled,
                    attempts: 0,
                }
            }
        };

        let retry = &policy.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            if attempts > 0 {
                let delay = retry.delay_for_attempt(attempts);
                tracing::debug!(owner = %owner, attempt = attempts + 1, delay_ms = delay.as_millis() as u64, "backing off");
                if !self.sleep_unless_cancelled(delay, cancel).await {
                    return JobOutcome::Failed {
                        error: SyncError::Cancelled,
                        attempts,
                    };
                }
            }
            attempts += 1;
            self.status.record_attempt();

            let result = match self.conditions.first_unmet(policy.require_idle) {
                Some(precondition) => Err(SyncError::PreconditionLost(precondition.to_string())),
                None => self.attempt(owner, policy.require_idle, cancel).await,
            };

            match result {
                Ok(ticks) => {
                    self.purge_tombstones(owner).await;
                    return JobOutcome::Completed { ticks, attempts };
                }
                Err(error) if error.is_retryable() && attempts < max_attempts => {
                    tracing::warn!(owner = %owner, attempt = attempts, error = %error, "sync attempt failed, will retry");
                }
                Err(error) => return JobOutcome::Failed { error, attempts },
            }
        }
    }

    /// Returns `Err` with the job outcome if the job must not start.
    async fn await_preconditions(
        &self,
        owner: &OwnerId,
        policy: &TriggerPolicy,
        cancel: &CancelToken,
    ) -> Result<(), JobOutcome> {
        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(JobOutcome::Failed {
                    error: SyncError::Cancelled,
                    attempts: 0,
                });
            }
            let Some(precondition) = self.conditions.first_unmet(policy.require_idle) else {
                return Ok(());
            };
            if !policy.wait_for_preconditions {
                return Err(JobOutcome::Skipped(precondition));
            }
            if started.elapsed() >= self.config.precondition_wait {
                return Err(JobOutcome::Failed {
                    error: SyncError::PreconditionsNotMet(precondition.to_string()),
                    attempts: 0,
                });
            }
            tracing::debug!(owner = %owner, precondition = %precondition, "waiting for precondition");
            if !self
                .sleep_unless_cancelled(self.config.precondition_poll, cancel)
                .await
            {
                return Err(JobOutcome::Failed {
                    error: SyncError::Cancelled,
                    attempts: 0,
                });
            }
        }
    }

    /// Sleeps for `delay`. Returns false if cancelled or shut down first.
    async fn sleep_unless_cancelled(&self, delay: Duration, cancel: &CancelToken) -> bool {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() || cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => !cancel.is_cancelled(),
            _ = shutdown.wait_for(|stopped| *stopped) => false,
        }
    }

    /// Runs one attempt on the blocking pool.
    async fn attempt(
        &self,
        owner: &OwnerId,
        require_idle: bool,
        cancel: &CancelToken,
    ) -> SyncResult<usize> {
        let token = cancel.child();
        let syncable = Arc::clone(&self.syncable);
        let conditions = Arc::clone(&self.conditions);
        let status = Arc::clone(&self.status);
        let target = owner.clone();
        let worker_token = token.clone();

        let mut task = tokio::task::spawn_blocking(move || {
            drive(
                syncable.as_ref(),
                conditions.as_ref(),
                &status,
                &target,
                require_idle,
                worker_token,
            )
        });

        let joined = match self.config.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    token.cancel();
                    // the run must stop before another attempt may start
                    let _ = task.await;
                    return Err(SyncError::Timeout);
                }
            },
            None => task.await,
        };
        joined.map_err(|e| SyncError::Unavailable(format!("sync worker failed: {e}")))?
    }

    async fn purge_tombstones(&self, owner: &OwnerId) {
        let Some(retention) = self.config.tombstone_retention else {
            return;
        };
        let retention_ms = u64::try_from(retention.as_millis()).unwrap_or(u64::MAX);
        let older_than = self.clock.now().saturating_sub(retention_ms);
        let syncable = Arc::clone(&self.syncable);
        let target = owner.clone();

        match tokio::task::spawn_blocking(move || syncable.purge_tombstones(&target, older_than))
            .await
        {
            Ok(Ok(purged)) => {
                tracing::debug!(owner = %owner, purged, "tombstone purge finished");
            }
            Ok(Err(e)) => tracing::warn!(owner = %owner, error = %e, "tombstone purge failed"),
            Err(e) => tracing::warn!(owner = %owner, error = %e, "tombstone purge worker failed"),
        }
    }
}

/// Iterates one run, publishing ticks and re-checking preconditions.
fn drive(
    syncable: &dyn Syncable,
    conditions: &dyn DeviceConditions,
    status: &SyncStatus,
    owner: &OwnerId,
    require_idle: bool,
    cancel: CancelToken,
) -> SyncResult<usize> {
    let mut lost: Option<Precondition> = None;
    let mut ticks = 0;

    for item in syncable.sync(owner, cancel.clone()) {
        match item {
            Ok(progress) => {
                ticks += 1;
                status.publish_progress(progress);
                if lost.is_none() {
                    if let Some(precondition) = conditions.first_unmet(require_idle) {
                        tracing::warn!(owner = %owner, precondition = %precondition, "precondition lost, cancelling run");
                        lost = Some(precondition);
                        cancel.cancel();
                    }
                }
            }
            Err(SyncError::Cancelled) => {
                return Err(match lost {
                    Some(precondition) => SyncError::PreconditionLost(precondition.to_string()),
                    None => SyncError::Cancelled,
                });
            }
            Err(e) => return Err(e),
        }
    }
    Ok(ticks)
}
