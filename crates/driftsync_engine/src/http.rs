//! HTTP remote store.
//!
//! The HTTP client is abstracted via a trait so any library (or an
//! in-process loopback) can carry the CBOR bodies.

use crate::error::{MalformedRecord, SyncError, SyncResult};
use crate::remote::{PulledRecord, RemoteStore};
use driftsync_protocol::{
    AckResponse, CodecResult, DeleteRequest, OwnerId, PullRequest, PullResponse, RecordId,
    ResponseStatus, SyncableRecord, Timestamp, UpsertRequest, DELETE_PATH, PULL_PATH,
    UPSERT_PATH,
};
use parking_lot::RwLock;

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    ///
    /// An `Err` means the request never produced a response.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;
}

/// A remote store reached over HTTP with CBOR bodies.
pub struct HttpRemoteStore<C: HttpClient> {
    base_url: String,
    client: C,
    token: RwLock<Option<Vec<u8>>>,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpRemoteStore<C> {
    /// Creates a remote store for `base_url`.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            token: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the bearer token sent with every request.
    pub fn with_token(self, token: Vec<u8>) -> Self {
        *self.token.write() = Some(token);
        self
    }

    /// Replaces the bearer token, e.g. after re-authentication.
    pub fn set_token(&self, token: Option<Vec<u8>>) {
        *self.token.write() = token;
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn token(&self) -> Option<Vec<u8>> {
        self.token.read().clone()
    }

    fn post(&self, path: &str, body: CodecResult<Vec<u8>>) -> SyncResult<Vec<u8>> {
        let body =
            body.map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;
        let url = format!("{}{}", self.base_url, path);
        match self.client.post(&url, body) {
            Ok(bytes) => {
                *self.last_error.write() = None;
                Ok(bytes)
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "request failed");
                *self.last_error.write() = Some(e.clone());
                Err(SyncError::Connectivity(e))
            }
        }
    }
}

fn status_error(status: ResponseStatus, message: Option<String>) -> SyncError {
    let message = message.unwrap_or_else(|| format!("{status:?}"));
    match status {
        ResponseStatus::Unauthorized => SyncError::Authorization(message),
        ResponseStatus::BadRequest => SyncError::Protocol(message),
        ResponseStatus::Ok | ResponseStatus::NotFound | ResponseStatus::Internal => {
            SyncError::Remote(message)
        }
    }
}

fn decode_pulled(bytes: &[u8]) -> PulledRecord {
    SyncableRecord::decode(bytes).map_err(|e| MalformedRecord::new(None, e.to_string()))
}

impl<C: HttpClient> RemoteStore for HttpRemoteStore<C> {
    fn pull(&self, owner: &OwnerId, since: Timestamp) -> SyncResult<Vec<PulledRecord>> {
        let request = PullRequest::new(owner.clone(), since).with_token(self.token());
        let bytes = self.post(PULL_PATH, request.encode())?;
        let response = PullResponse::decode(&bytes)
            .map_err(|e| SyncError::Protocol(format!("failed to decode pull response: {e}")))?;
        if !response.status.is_ok() {
            return Err(status_error(response.status, response.error));
        }
        Ok(response.records.iter().map(|r| decode_pulled(r)).collect())
    }

    fn upsert(&self, record: &SyncableRecord) -> SyncResult<()> {
        let request = UpsertRequest::new(record.clone()).with_token(self.token());
        let bytes = self.post(UPSERT_PATH, request.encode())?;
        let ack = AckResponse::decode(&bytes)
            .map_err(|e| SyncError::Protocol(format!("failed to decode ack: {e}")))?;
        if ack.status.is_ok() {
            Ok(())
        } else {
            Err(status_error(ack.status, ack.error))
        }
    }

    fn delete(&self, id: &RecordId) -> SyncResult<()> {
        let request = DeleteRequest::new(id.clone()).with_token(self.token());
        let bytes = self.post(DELETE_PATH, request.encode())?;
        let ack = AckResponse::decode(&bytes)
            .map_err(|e| SyncError::Protocol(format!("failed to decode ack: {e}")))?;
        match ack.status {
            // already gone is the desired end state
            ResponseStatus::Ok | ResponseStatus::NotFound => Ok(()),
            status => Err(status_error(status, ack.error)),
        }
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// A client that routes requests directly to an in-process server.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a client connected to `server`.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let path = url.find("/sync/").map_or(url, |i| &url[i..]);
        self.server.handle_post(path, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct TestClient {
        response: Mutex<Result<Vec<u8>, String>>,
        last_url: Mutex<Option<String>>,
    }

    impl TestClient {
        fn responding(bytes: Vec<u8>) -> Self {
            Self {
                response: Mutex::new(Ok(bytes)),
                last_url: Mutex::new(None),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                response: Mutex::new(Err(message.to_string())),
                last_url: Mutex::new(None),
            }
        }
    }

    impl HttpClient for TestClient {
        fn post(&self, url: &str, _body: Vec<u8>) -> Result<Vec<u8>, String> {
            *self.last_url.lock().unwrap() = Some(url.to_string());
            self.response.lock().unwrap().clone()
        }
    }

    fn record(id: &str) -> SyncableRecord {
        SyncableRecord::with_id(id.into(), "o".into(), b"x".to_vec(), 10)
    }

    #[test]
    fn pull_decodes_each_record_separately() {
        let mut response = PullResponse::ok(&[record("a"), record("b")]).unwrap();
        response.records[0] = vec![0xFF, 0x00];

        let remote = HttpRemoteStore::new(
            "https://sync.example.com",
            TestClient::responding(response.encode().unwrap()),
        );
        let pulled = remote.pull(&"o".into(), 0).unwrap();
        assert_eq!(pulled.len(), 2);
        assert!(pulled[0].is_err());
        assert_eq!(pulled[1].as_ref().unwrap().id, RecordId::from("b"));

        let url = remote.client.last_url.lock().unwrap().clone().unwrap();
        assert_eq!(url, "https://sync.example.com/sync/pull");
    }

    #[test]
    fn transport_failure_is_connectivity() {
        let remote = HttpRemoteStore::new("http://h", TestClient::failing("connection refused"));
        assert!(matches!(
            remote.upsert(&record("a")),
            Err(SyncError::Connectivity(_))
        ));
        assert_eq!(remote.last_error().as_deref(), Some("connection refused"));
    }

    #[test]
    fn unauthorized_status_is_authorization() {
        let ack = AckResponse::failure(ResponseStatus::Unauthorized, "bad token");
        let remote = HttpRemoteStore::new("http://h", TestClient::responding(ack.encode().unwrap()));
        assert!(matches!(
            remote.upsert(&record("a")),
            Err(SyncError::Authorization(_))
        ));
    }

    #[test]
    fn garbage_response_is_protocol_error() {
        let remote = HttpRemoteStore::new("http://h", TestClient::responding(vec![0xFF]));
        assert!(matches!(
            remote.pull(&"o".into(), 0),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn delete_of_missing_record_succeeds() {
        let ack = AckResponse::failure(ResponseStatus::NotFound, "gone");
        let remote = HttpRemoteStore::new("http://h", TestClient::responding(ack.encode().unwrap()));
        assert!(remote.delete(&"a".into()).is_ok());
    }
}
