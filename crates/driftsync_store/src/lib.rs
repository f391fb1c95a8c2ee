//! # driftsync Store
//!
//! The local side of synchronization.
//!
//! This crate provides:
//! - [`LocalStore`], the contract the sync orchestrator consumes
//! - [`LocalWrites`], application-side mutations that queue records for push
//! - [`MemoryLocalStore`], a volatile store for tests and caches
//! - [`JournaledLocalStore`], a durable store backed by an append-only journal
//!
//! ## Journal format
//!
//! ```text
//! | magic "DSJL" (4) | version (2) | kind (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! A frame cut short by a crash is discarded on open. A checksum mismatch is
//! treated as corruption and the store refuses to open.
//!
//! ## Invariants
//!
//! - Every operation is atomic for a single record
//! - Batch writes are not transactional across records
//! - Pending records are listed oldest first

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod error;
mod index;
mod journal;
mod journaled;
mod local;
mod memory;

pub use backend::{FileJournal, JournalBackend, MemoryJournal};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use journal::{compute_crc32, FrameKind, JournalEntry, Replay, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use journaled::{CompactionStats, JournaledLocalStore};
pub use local::{LocalStore, LocalWrites};
pub use memory::MemoryLocalStore;
