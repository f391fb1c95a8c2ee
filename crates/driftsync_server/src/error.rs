//! Error types for the sync server.

use driftsync_protocol::{CodecError, RecordId, ResponseStatus};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Authorization failed.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The record does not exist.
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// A message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::AuthenticationFailed(_)
                | ServerError::NotAuthorized(_)
                | ServerError::NotFound(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::Codec(_) | ServerError::Internal(_) | ServerError::Io(_)
        )
    }

    /// Returns the wire status reported for this error.
    pub fn status(&self) -> ResponseStatus {
        match self {
            ServerError::InvalidRequest(_) => ResponseStatus::BadRequest,
            ServerError::AuthenticationFailed(_) | ServerError::NotAuthorized(_) => {
                ResponseStatus::Unauthorized
            }
            ServerError::NotFound(_) => ResponseStatus::NotFound,
            ServerError::Codec(_) | ServerError::Internal(_) | ServerError::Io(_) => {
                ResponseStatus::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::NotFound("a".into()).is_server_error());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            ServerError::AuthenticationFailed("x".into()).status(),
            ResponseStatus::Unauthorized
        );
        assert_eq!(
            ServerError::NotFound("a".into()).status(),
            ResponseStatus::NotFound
        );
        assert_eq!(
            ServerError::InvalidRequest("x".into()).status(),
            ResponseStatus::BadRequest
        );
    }
}
