//! Request handlers for sync endpoints.

use crate::auth::TokenValidator;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::hub::RecordHub;
use driftsync_protocol::{
    AckResponse, DeleteRequest, OwnerId, PullRequest, PullResponse, UpsertRequest,
};
use std::sync::Arc;

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Record storage (shared across all handlers).
    pub hub: Arc<RecordHub>,
    validator: Option<TokenValidator>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, hub: Arc<RecordHub>) -> Self {
        let validator = config.auth.clone().map(TokenValidator::new);
        Self {
            config,
            hub,
            validator,
        }
    }

    /// Returns the token validator when authentication is on.
    pub fn validator(&self) -> Option<&TokenValidator> {
        self.validator.as_ref()
    }

    fn authorize(&self, token: Option<&[u8]>, owner: &OwnerId) -> ServerResult<()> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        let token =
            token.ok_or_else(|| ServerError::AuthenticationFailed("missing token".into()))?;
        validator.validate_token(token, owner)
    }
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, request: PullRequest) -> ServerResult<PullResponse> {
        self.context
            .authorize(request.token.as_deref(), &request.owner_id)?;
        let records = self.context.hub.pull(&request.owner_id, request.since);
        tracing::debug!(
            owner = %request.owner_id,
            since = request.since,
            records = records.len(),
            "pull"
        );
        Ok(PullResponse::ok(&records)?)
    }

    /// Handles an upsert request.
    pub fn handle_upsert(&self, request: UpsertRequest) -> ServerResult<AckResponse> {
        let record = request.record;
        self.context
            .authorize(request.token.as_deref(), &record.owner_id)?;

        if record.payload.len() > self.context.config.max_payload_bytes {
            return Err(ServerError::InvalidRequest(format!(
                "payload of {} bytes exceeds limit of {}",
                record.payload.len(),
                self.context.config.max_payload_bytes
            )));
        }

        tracing::debug!(
            owner = %record.owner_id,
            record = %record.id,
            deleted = record.deleted,
            "upsert"
        );
        self.context.hub.upsert(record)?;
        Ok(AckResponse::ok())
    }

    /// Handles a hard delete.
    pub fn handle_delete(&self, request: DeleteRequest) -> ServerResult<AckResponse> {
        let owner = self
            .context
            .hub
            .owner_of(&request.id)
            .ok_or_else(|| ServerError::NotFound(request.id.clone()))?;
        self.context.authorize(request.token.as_deref(), &owner)?;

        self.context.hub.delete(&request.id);
        tracing::debug!(owner = %owner, record = %request.id, "delete");
        Ok(AckResponse::ok())
    }
}
