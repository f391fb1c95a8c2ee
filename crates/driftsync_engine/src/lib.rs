//! # driftsync Engine
//!
//! Offline-first bidirectional sync for driftsync.
//!
//! This crate provides:
//! - The [`RemoteStore`] contract with in-memory and HTTP implementations
//! - [`SyncOrchestrator`], a lazy pull-then-push run per owner
//! - [`SyncScheduler`], which coalesces requests, checks device
//!   preconditions and retries with exponential backoff
//! - [`SyncManager`], the facade applications hold on to
//!
//! ## Architecture
//!
//! A sync run has two phases:
//! 1. Pull remote records modified after the newest local record, and apply
//!    them with last-writer-wins
//! 2. Push every pending local change, oldest first, marking each synced
//!    once the remote confirms it
//!
//! The run is an [`Iterator`] of [`SyncProgress`] ticks; nothing happens
//! until it is driven. The scheduler drives runs on tokio's blocking pool
//! and publishes `is_syncing` and progress through watch channels.
//!
//! ## Key Invariants
//!
//! - Pull always happens before push
//! - At most one job per owner is in flight
//! - A record is marked synced only after the remote confirmed it
//! - Ties in `last_modified_at` keep the local copy
//! - Malformed pulled records are skipped, never fatal to the batch

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod conditions;
mod config;
mod error;
mod http;
mod manager;
mod orchestrator;
mod progress;
mod remote;
mod scheduler;
mod status;
mod syncable;

pub use cancel::CancelToken;
pub use conditions::{AlwaysReady, DeviceConditions, ManualConditions, Precondition, Trigger};
pub use config::{RetryConfig, SchedulerConfig, TriggerPolicy};
pub use error::{MalformedRecord, SyncError, SyncResult};
pub use driftsync_protocol::{DELETE_PATH, PULL_PATH, UPSERT_PATH};
pub use http::{HttpClient, HttpRemoteStore, LoopbackClient, LoopbackServer};
pub use manager::{SyncManager, SyncManagerBuilder};
pub use orchestrator::{SyncOrchestrator, SyncRun};
pub use progress::{SyncPhase, SyncProgress, SyncReport, SyncState, SyncStats};
pub use remote::{MemoryRemoteStore, PulledRecord, RemoteCalls, RemoteStore};
pub use scheduler::{RequestOutcome, SchedulerBuilder, SyncScheduler};
pub use status::{SchedulerStats, SyncFailure, SyncStatus};
pub use syncable::{SyncStream, Syncable};
