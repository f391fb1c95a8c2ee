//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::hub::RecordHub;
use driftsync_protocol::{
    AckResponse, CodecError, DeleteRequest, PullRequest, PullResponse, ResponseStatus,
    UpsertRequest, DELETE_PATH, PULL_PATH, UPSERT_PATH,
};
use std::sync::Arc;

/// The sync server.
///
/// Serves the CBOR wire protocol over any transport that can hand it a path
/// and a request body. Failures become status codes in the response; only an
/// unknown path is a transport-level error.
///
/// # Example
///
/// ```
/// use driftsync_server::{SyncServer, ServerConfig};
///
/// let server = SyncServer::new(ServerConfig::default());
///
/// // An HTTP front end would forward POST bodies:
/// // server.handle_post("/sync/pull", &body)
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a server with an empty hub.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_hub(config, Arc::new(RecordHub::new()))
    }

    /// Creates a server over an existing hub.
    pub fn with_hub(config: ServerConfig, hub: Arc<RecordHub>) -> Self {
        let context = Arc::new(HandlerContext::new(config, hub));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Creates a server, loading the hub from the configured snapshot path.
    pub fn open(config: ServerConfig) -> ServerResult<Self> {
        let hub = match &config.snapshot_path {
            Some(path) => RecordHub::load(path)?,
            None => RecordHub::new(),
        };
        tracing::info!(records = hub.len(), owners = hub.owner_count(), "sync server opened");
        Ok(Self::with_hub(config, Arc::new(hub)))
    }

    /// Writes the hub to the configured snapshot path, if any.
    pub fn persist(&self) -> ServerResult<()> {
        match &self.context.config.snapshot_path {
            Some(path) => self.context.hub.save(path),
            None => Ok(()),
        }
    }

    /// Returns the hub.
    pub fn hub(&self) -> &Arc<RecordHub> {
        &self.context.hub
    }

    /// Returns the handler context.
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, request: PullRequest) -> PullResponse {
        self.handler
            .handle_pull(request)
            .unwrap_or_else(|e| PullResponse::failure(rejected(&e), e.to_string()))
    }

    /// Handles an upsert request.
    pub fn handle_upsert(&self, request: UpsertRequest) -> AckResponse {
        self.handler
            .handle_upsert(request)
            .unwrap_or_else(|e| AckResponse::failure(rejected(&e), e.to_string()))
    }

    /// Handles a delete request.
    pub fn handle_delete(&self, request: DeleteRequest) -> AckResponse {
        self.handler
            .handle_delete(request)
            .unwrap_or_else(|e| AckResponse::failure(rejected(&e), e.to_string()))
    }

    /// Dispatches an encoded request by path and returns the encoded response.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        let encoded = match path {
            PULL_PATH => match PullRequest::decode(body) {
                Ok(request) => self.handle_pull(request).encode(),
                Err(e) => PullResponse::failure(ResponseStatus::BadRequest, undecodable(&e)).encode(),
            },
            UPSERT_PATH => match UpsertRequest::decode(body) {
                Ok(request) => self.handle_upsert(request).encode(),
                Err(e) => AckResponse::failure(ResponseStatus::BadRequest, undecodable(&e)).encode(),
            },
            DELETE_PATH => match DeleteRequest::decode(body) {
                Ok(request) => self.handle_delete(request).encode(),
                Err(e) => AckResponse::failure(ResponseStatus::BadRequest, undecodable(&e)).encode(),
            },
            other => return Err(format!("no route for {other}")),
        };
        encoded.map_err(|e| format!("failed to encode response: {e}"))
    }
}

fn rejected(error: &ServerError) -> ResponseStatus {
    if error.is_server_error() {
        tracing::error!(error = %error, "request failed");
    } else {
        tracing::debug!(error = %error, "request rejected");
    }
    error.status()
}

fn undecodable(error: &CodecError) -> String {
    tracing::debug!(error = %error, "undecodable request");
    error.to_string()
}
