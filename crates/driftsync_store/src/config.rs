//! Configuration for the journaled store.

/// Configuration for [`JournaledLocalStore`](crate::JournaledLocalStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Sync the journal to disk after every write.
    pub sync_on_write: bool,
    /// Number of superseded frames that triggers a compaction.
    ///
    /// `0` disables automatic compaction.
    pub compact_threshold: usize,
}

impl StoreConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            sync_on_write: true,
            compact_threshold: 1024,
        }
    }

    /// Sets whether every write is synced.
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Sets the compaction threshold.
    pub fn with_compact_threshold(mut self, threshold: usize) -> Self {
        self.compact_threshold = threshold;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_config_builder() {
        let config = StoreConfig::new()
            .with_sync_on_write(false)
            .with_compact_threshold(8);
        assert!(!config.sync_on_write);
        assert_eq!(config.compact_threshold, 8);
        assert!(StoreConfig::default().sync_on_write);
    }
}
