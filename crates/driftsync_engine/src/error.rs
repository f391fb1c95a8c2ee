//! Error types for the sync engine.

use driftsync_protocol::RecordId;
use driftsync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// A pulled record that could not be decoded or accepted.
///
/// Malformed records are logged and skipped; they never abort a batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed remote record{}: {reason}", .id.as_ref().map(|id| format!(" {id}")).unwrap_or_default())]
pub struct MalformedRecord {
    /// Identifier, when it could be recovered.
    pub id: Option<RecordId>,
    /// Why the record was rejected.
    pub reason: String,
}

impl MalformedRecord {
    /// Creates a malformed record error.
    pub fn new(id: Option<RecordId>, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote store is unreachable.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// The remote rejected credentials or ownership.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// A local store operation failed.
    #[error("local store error: {0}")]
    LocalStore(#[from] StoreError),

    /// The remote failed while handling a valid request.
    #[error("remote error: {0}")]
    Remote(String),

    /// A request or response could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A single pulled record was unusable.
    #[error(transparent)]
    MalformedRecord(#[from] MalformedRecord),

    /// The run was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A device precondition stopped holding while the job ran.
    #[error("precondition lost: {0}")]
    PreconditionLost(String),

    /// Device preconditions did not hold within the allowed wait.
    #[error("preconditions not met: {0}")]
    PreconditionsNotMet(String),

    /// An attempt exceeded its time limit.
    #[error("operation timed out")]
    Timeout,

    /// The scheduler cannot accept work.
    #[error("scheduler unavailable: {0}")]
    Unavailable(String),
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Connectivity(_)
            | SyncError::LocalStore(_)
            | SyncError::Remote(_)
            | SyncError::PreconditionLost(_)
            | SyncError::Timeout => true,
            SyncError::Authorization(_)
            | SyncError::Protocol(_)
            | SyncError::MalformedRecord(_)
            | SyncError::Cancelled
            | SyncError::PreconditionsNotMet(_)
            | SyncError::Unavailable(_) => false,
        }
    }

    /// Returns true if the application should prompt for re-authentication.
    pub fn needs_reauthentication(&self) -> bool {
        matches!(self, SyncError::Authorization(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::Connectivity("connection reset".into()).is_retryable());
        assert!(SyncError::Remote("internal error".into()).is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::PreconditionLost("network".into()).is_retryable());
        assert!(SyncError::LocalStore(StoreError::corrupted("x")).is_retryable());

        assert!(!SyncError::Authorization("expired".into()).is_retryable());
        assert!(!SyncError::Protocol("bad cbor".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::PreconditionsNotMet("battery".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = MalformedRecord::new(Some("r1".into()), "bad payload");
        assert_eq!(err.to_string(), "malformed remote record r1: bad payload");
        let err = MalformedRecord::new(None, "truncated");
        assert_eq!(err.to_string(), "malformed remote record: truncated");

        assert!(SyncError::Authorization("nope".into()).needs_reauthentication());
        assert_eq!(SyncError::Cancelled.to_string(), "sync cancelled");
    }
}
