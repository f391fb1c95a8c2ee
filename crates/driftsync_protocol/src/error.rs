//! Error types for the protocol crate.

use crate::record::RecordId;
use thiserror::Error;

/// Result type for encoding and decoding.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding or decoding CBOR.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Value could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Bytes could not be deserialized into the expected shape.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// A broken metadata invariant on a [`SyncableRecord`](crate::SyncableRecord).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A deleted record carries an action other than `Delete` while unconfirmed.
    #[error("record {0} is deleted but not queued for delete")]
    DeleteNotQueued(RecordId),

    /// A record was modified after its last sync without being queued.
    #[error("record {id} modified at {modified_at} after sync at {synced_at} but not pending")]
    UnconfirmedChange {
        /// Record identifier.
        id: RecordId,
        /// Last local modification.
        modified_at: u64,
        /// Last confirmed sync.
        synced_at: u64,
    },

    /// A mutation was attempted on a soft-deleted record.
    #[error("record {0} is deleted")]
    AlreadyDeleted(RecordId),

    /// The record identifier is empty.
    #[error("record id must not be empty")]
    EmptyId,
}
