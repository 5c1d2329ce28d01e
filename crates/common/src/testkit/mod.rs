//! Helpers for exercising image streams against misbehaving storage
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testkit::FlakyStore;
//!
//! let store = Arc::new(FlakyStore::new());
//! store.fail_writes(true);
//! assert!(stream.flush().is_err());
//! store.fail_writes(false);
//! stream.flush()?;
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use segment_store::{MemoryStore, SegmentStore, SegmentStoreError};

/// Memory store whose writes can be switched to fail
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    failed_writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write fail (or succeed again)
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Writes rejected so far
    pub fn failed_writes(&self) -> usize {
        self.failed_writes.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

impl SegmentStore for FlakyStore {
    fn write_segment(&self, name: &str, data: Bytes) -> segment_store::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            self.failed_writes.fetch_add(1, Ordering::SeqCst);
            return Err(SegmentStoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("injected write failure for {}", name),
            )));
        }
        self.inner.write_segment(name, data)
    }

    fn read_segment(&self, name: &str) -> segment_store::Result<Bytes> {
        self.inner.read_segment(name)
    }

    fn has_segment(&self, name: &str) -> segment_store::Result<bool> {
        self.inner.has_segment(name)
    }

    fn list_segments(&self, prefix: &str) -> segment_store::Result<Vec<String>> {
        self.inner.list_segments(prefix)
    }
}

/// Flip one bit of a stored segment in place
pub fn flip_bit(store: &dyn SegmentStore, name: &str, at: usize) -> segment_store::Result<()> {
    let mut data = store.read_segment(name)?.to_vec();
    let len = data.len();
    let byte = data.get_mut(at).ok_or_else(|| {
        SegmentStoreError::InvalidName(format!("{} has {} bytes, cannot flip byte {}", name, len, at))
    })?;
    *byte ^= 0x01;
    store.write_segment(name, Bytes::from(data))
}
