use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{Result, SegmentStoreError};
use crate::store::SegmentStore;

/// In-memory segment store backed by an ordered map
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of segments currently held.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl SegmentStore for MemoryStore {
    fn write_segment(&self, name: &str, data: Bytes) -> Result<()> {
        tracing::trace!(segment = name, len = data.len(), "memory store write");
        self.inner.write().insert(name.to_string(), data);
        Ok(())
    }

    fn read_segment(&self, name: &str) -> Result<Bytes> {
        self.inner
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SegmentStoreError::NotFound(name.to_string()))
    }

    fn has_segment(&self, name: &str) -> Result<bool> {
        Ok(self.inner.read().contains_key(name))
    }

    fn list_segments(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.inner.read();
        Ok(inner
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect())
    }
}
