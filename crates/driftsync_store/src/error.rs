//! Error types for local store operations.

use driftsync_protocol::{CodecError, InvariantViolation, RecordId};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for local store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in a local store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The journal is corrupted.
    #[error("journal corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the store directory.
    #[error("store directory is locked: {}", .0.display())]
    Locked(PathBuf),

    /// A record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A mutation would break a record invariant.
    #[error("invalid record: {0}")]
    Invariant(#[from] InvariantViolation),

    /// The record does not exist.
    #[error("record not found: {0}")]
    NotFound(RecordId),
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Returns true if retrying the same operation may succeed.
    ///
    /// I/O failures are transient; corruption and invalid input are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Locked(_))
    }
}
