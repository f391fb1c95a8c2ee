//! Owner tokens for the sync server.
//!
//! Tokens bind a request to one owner partition and carry their issue time
//! for expiry checks.
//!
//! ## Token Format
//!
//! - 2 bytes: owner id length (big-endian)
//! - N bytes: owner id (UTF-8)
//! - 8 bytes: issue time (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 over everything before it

use crate::error::{ServerError, ServerResult};
use driftsync_protocol::OwnerId;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_LEN: usize = 32;
const MIN_TOKEN_LEN: usize = 2 + 8 + SIGNATURE_LEN;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and checks owner tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a token for `owner`, valid from now.
    pub fn create_token(&self, owner: &OwnerId) -> ServerResult<Vec<u8>> {
        self.create_token_at(owner, now_millis())
    }

    /// Issues a token for `owner` with an explicit issue time.
    pub fn create_token_at(&self, owner: &OwnerId, issued_at: u64) -> ServerResult<Vec<u8>> {
        let owner_bytes = owner.as_str().as_bytes();
        let owner_len = u16::try_from(owner_bytes.len())
            .map_err(|_| ServerError::InvalidRequest("owner id too long".into()))?;

        let mut token = Vec::with_capacity(MIN_TOKEN_LEN + owner_bytes.len());
        token.extend_from_slice(&owner_len.to_be_bytes());
        token.extend_from_slice(owner_bytes);
        token.extend_from_slice(&issued_at.to_be_bytes());

        let signature = self.mac(&token)?.finalize().into_bytes();
        token.extend_from_slice(&signature);
        Ok(token)
    }

    /// Validates a token and returns the owner it was issued for.
    pub fn owner_of(&self, token: &[u8]) -> ServerResult<OwnerId> {
        if token.len() < MIN_TOKEN_LEN {
            return Err(ServerError::AuthenticationFailed("token too short".into()));
        }
        let (len_bytes, rest) = token.split_at(2);
        let owner_len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));
        if token.len() != MIN_TOKEN_LEN + owner_len {
            return Err(ServerError::AuthenticationFailed("invalid token length".into()));
        }

        let (owner_bytes, rest) = rest.split_at(owner_len);
        let (issued_bytes, signature) = rest.split_at(8);
        let signed = &token[..token.len() - SIGNATURE_LEN];

        self.mac(signed)?
            .verify_slice(signature)
            .map_err(|_| ServerError::AuthenticationFailed("invalid signature".into()))?;

        let mut issued = [0u8; 8];
        issued.copy_from_slice(issued_bytes);
        let issued_at = u64::from_be_bytes(issued);
        let expiry = u64::try_from(self.config.token_expiry.as_millis()).unwrap_or(u64::MAX);
        if now_millis() > issued_at.saturating_add(expiry) {
            return Err(ServerError::AuthenticationFailed("token expired".into()));
        }

        let owner = std::str::from_utf8(owner_bytes)
            .map_err(|_| ServerError::AuthenticationFailed("owner id is not utf-8".into()))?;
        Ok(OwnerId::new(owner))
    }

    /// Validates a token for `expected_owner`.
    pub fn validate_token(&self, token: &[u8], expected_owner: &OwnerId) -> ServerResult<()> {
        let owner = self.owner_of(token)?;
        if &owner != expected_owner {
            return Err(ServerError::NotAuthorized(format!(
                "token issued for {owner}, not {expected_owner}"
            )));
        }
        Ok(())
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("invalid hmac key: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
