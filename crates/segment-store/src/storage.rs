//! Segment storage backend selection (memory / local directory).

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::directory::DirectoryStore;
use crate::error::Result;
use crate::memory::MemoryStore;
use crate::store::SegmentStore;

/// Configuration for the segment storage backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentStoreConfig {
    /// In-memory storage (for testing)
    #[default]
    Memory,

    /// Local directory storage, one file per segment
    Directory {
        /// Path to the storage directory
        path: PathBuf,
    },
}

impl SegmentStoreConfig {
    /// Open the configured backend.
    pub fn open(&self) -> Result<Arc<dyn SegmentStore>> {
        let store: Arc<dyn SegmentStore> = match self {
            SegmentStoreConfig::Memory => Arc::new(MemoryStore::new()),
            SegmentStoreConfig::Directory { path } => Arc::new(DirectoryStore::new(path)?),
        };
        tracing::debug!(config = ?self, "opened segment store");
        Ok(store)
    }
}
