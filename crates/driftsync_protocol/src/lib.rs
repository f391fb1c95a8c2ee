//! # driftsync Protocol
//!
//! Record model and protocol types for driftsync.
//!
//! This crate provides:
//! - [`SyncableRecord`], the unit of synchronization, and its metadata invariants
//! - [`PendingAction`], the operation to replay against the remote store
//! - The last-writer-wins rule used to reconcile pulled records ([`resolve`])
//! - A millisecond [`Clock`] abstraction with monotonic assignment
//! - Wire messages for the reference HTTP remote and their CBOR codec
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod codec;
mod conflict;
mod error;
mod messages;
mod record;

pub use clock::{next_modified_at, Clock, ManualClock, SystemClock, Timestamp};
pub use codec::{from_cbor, to_cbor};
pub use conflict::{resolve, Conflict, ConflictResolution};
pub use error::{CodecError, CodecResult, InvariantViolation};
pub use messages::{
    AckResponse, DeleteRequest, PullRequest, PullResponse, ResponseStatus, UpsertRequest,
    DELETE_PATH, PULL_PATH, UPSERT_PATH,
};
pub use record::{OwnerId, PendingAction, RecordId, SyncableRecord};
