//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod records;
pub mod sync;

use driftsync_store::{FileJournal, JournaledLocalStore, StoreConfig, StoreResult};
use std::path::Path;

/// Opens the journaled store at `path`.
pub fn open_store(path: &Path) -> StoreResult<JournaledLocalStore<FileJournal>> {
    JournaledLocalStore::open_dir(path, StoreConfig::default())
}
