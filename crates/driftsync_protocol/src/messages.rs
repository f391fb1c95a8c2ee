//! Wire messages for the reference HTTP remote.
//!
//! Every message is a CBOR map. Pulled records travel as individually encoded
//! byte strings so the client can skip one undecodable record without losing
//! the rest of the batch.

use crate::clock::Timestamp;
use crate::codec::{from_cbor, to_cbor};
use crate::error::CodecResult;
use crate::record::{OwnerId, RecordId, SyncableRecord};
use serde::{Deserialize, Serialize};

/// Endpoint for pulls.
pub const PULL_PATH: &str = "/sync/pull";
/// Endpoint for upserts.
pub const UPSERT_PATH: &str = "/sync/upsert";
/// Endpoint for hard deletes.
pub const DELETE_PATH: &str = "/sync/delete";

/// Outcome class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    /// Request applied.
    Ok,
    /// Credentials missing, invalid, or not valid for the owner.
    Unauthorized,
    /// Request was malformed.
    BadRequest,
    /// Target record does not exist.
    NotFound,
    /// Server-side failure; the request may be retried.
    Internal,
}

impl ResponseStatus {
    /// Returns true for [`ResponseStatus::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, ResponseStatus::Ok)
    }
}

/// Asks for every record of `owner_id` modified after `since`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Owner partition to read.
    pub owner_id: OwnerId,
    /// Pull cursor; `0` requests a full resync.
    pub since: Timestamp,
    /// Bearer token, if the server requires one.
    pub token: Option<Vec<u8>>,
}

impl PullRequest {
    /// Creates a pull request.
    pub fn new(owner_id: OwnerId, since: Timestamp) -> Self {
        Self {
            owner_id,
            since,
            token: None,
        }
    }

    /// Attaches a bearer token.
    pub fn with_token(mut self, token: Option<Vec<u8>>) -> Self {
        self.token = token;
        self
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

/// Records returned by a pull, ascending by modification time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Outcome.
    pub status: ResponseStatus,
    /// Error message when `status` is not `Ok`.
    pub error: Option<String>,
    /// Individually CBOR-encoded records.
    pub records: Vec<Vec<u8>>,
}

impl PullResponse {
    /// Creates a successful response carrying `records`.
    pub fn ok(records: &[SyncableRecord]) -> CodecResult<Self> {
        let records = records
            .iter()
            .map(SyncableRecord::encode)
            .collect::<CodecResult<Vec<_>>>()?;
        Ok(Self {
            status: ResponseStatus::Ok,
            error: None,
            records,
        })
    }

    /// Creates a failed response.
    pub fn failure(status: ResponseStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
            records: Vec::new(),
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

/// Full-document replace of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertRequest {
    /// Complete record; never a partial patch.
    pub record: SyncableRecord,
    /// Bearer token, if the server requires one.
    pub token: Option<Vec<u8>>,
}

impl UpsertRequest {
    /// Creates an upsert request.
    pub fn new(record: SyncableRecord) -> Self {
        Self {
            record,
            token: None,
        }
    }

    /// Attaches a bearer token.
    pub fn with_token(mut self, token: Option<Vec<u8>>) -> Self {
        self.token = token;
        self
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

/// Hard delete of a confirmed, fully propagated soft delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    /// Record to remove.
    pub id: RecordId,
    /// Bearer token, if the server requires one.
    pub token: Option<Vec<u8>>,
}

impl DeleteRequest {
    /// Creates a delete request.
    pub fn new(id: RecordId) -> Self {
        Self { id, token: None }
    }

    /// Attaches a bearer token.
    pub fn with_token(mut self, token: Option<Vec<u8>>) -> Self {
        self.token = token;
        self
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

/// Reply to an upsert or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    /// Outcome.
    pub status: ResponseStatus,
    /// Error message when `status` is not `Ok`.
    pub error: Option<String>,
}

impl AckResponse {
    /// Creates a successful acknowledgement.
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            error: None,
        }
    }

    /// Creates a failed acknowledgement.
    pub fn failure(status: ResponseStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}
