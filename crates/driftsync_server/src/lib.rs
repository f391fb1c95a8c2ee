//! # driftsync Server
//!
//! Reference remote store of record for driftsync.
//!
//! This crate provides:
//! - An owner-partitioned record hub with snapshot persistence
//! - Handlers for the pull, upsert and delete endpoints
//! - Owner tokens (HMAC-SHA256)
//!
//! # Authentication
//!
//! Authentication is optional. When enabled, every request must carry a
//! token issued for the owner whose partition it touches:
//!
//! ```rust,ignore
//! use driftsync_server::{AuthConfig, ServerConfig, SyncServer, TokenValidator};
//!
//! let secret = b"my-secure-secret-32-bytes-long!".to_vec();
//! let server = SyncServer::new(ServerConfig::default().with_auth(secret.clone()));
//!
//! let validator = TokenValidator::new(AuthConfig::new(secret));
//! let token = validator.create_token(&"alice".into())?;
//! ```
//!
//! # Protocol
//!
//! Clients pull then push:
//! 1. `POST /sync/pull` returns the owner's records modified after a cursor
//! 2. `POST /sync/upsert` replaces one record (soft deletes included)
//! 3. `POST /sync/delete` hard-deletes a purged tombstone

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod hub;
mod server;

pub use auth::{AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use hub::RecordHub;
pub use server::SyncServer;
