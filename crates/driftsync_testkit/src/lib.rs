//! # driftsync Testkit
//!
//! Test utilities for driftsync.
//!
//! This crate provides:
//! - Record builders and ready-wired stores ([`TestStores`])
//! - Remote doubles that fail on cue or block until released
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use driftsync_testkit::prelude::*;
//!
//! #[test]
//! fn pushes_pending() {
//!     let stores = TestStores::new(1_000);
//!     stores.local.upsert(record("a", "alice", 500)).unwrap();
//!     stores.orchestrator().sync_to_completion(&"alice".into()).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod remotes;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remotes::*;
}

pub use fixtures::*;
pub use generators::*;
pub use remotes::*;
