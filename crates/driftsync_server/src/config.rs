//! Server configuration.

use crate::auth::AuthConfig;
use std::path::PathBuf;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest accepted record payload, in bytes.
    pub max_payload_bytes: usize,
    /// Token settings; `None` disables authentication.
    pub auth: Option<AuthConfig>,
    /// Where the hub snapshot is persisted, if anywhere.
    pub snapshot_path: Option<PathBuf>,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new() -> Self {
        Self {
            max_payload_bytes: 1024 * 1024,
            auth: None,
            snapshot_path: None,
        }
    }

    /// Sets the payload limit.
    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.auth = Some(AuthConfig::new(secret));
        self
    }

    /// Enables authentication with a full auth configuration.
    pub fn with_auth_config(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Persists the hub to `path`.
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Returns true if requests must carry a token.
    pub fn requires_auth(&self) -> bool {
        self.auth.is_some()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
