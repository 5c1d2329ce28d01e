use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;

/// A flat namespace of named, overwritable byte blobs.
///
/// Implementations must be safe to share between threads; the image engine
/// holds them behind an `Arc<dyn SegmentStore>` and may drive several streams
/// against the same store. No retry or timeout policy is applied here, a
/// failing call is reported as-is.
pub trait SegmentStore: Send + Sync + Debug {
    /// Store `data` under `name`, replacing any previous contents.
    fn write_segment(&self, name: &str, data: Bytes) -> Result<()>;

    /// Read the full contents of `name`.
    ///
    /// Returns [`SegmentStoreError::NotFound`](crate::SegmentStoreError::NotFound)
    /// if no such segment exists.
    fn read_segment(&self, name: &str) -> Result<Bytes>;

    /// Check whether a segment named `name` exists.
    fn has_segment(&self, name: &str) -> Result<bool>;

    /// List all segment names starting with `prefix`, sorted ascending.
    fn list_segments(&self, prefix: &str) -> Result<Vec<String>>;
}

impl<T: SegmentStore + ?Sized> SegmentStore for Arc<T> {
    fn write_segment(&self, name: &str, data: Bytes) -> Result<()> {
        (**self).write_segment(name, data)
    }

    fn read_segment(&self, name: &str) -> Result<Bytes> {
        (**self).read_segment(name)
    }

    fn has_segment(&self, name: &str) -> Result<bool> {
        (**self).has_segment(name)
    }

    fn list_segments(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list_segments(prefix)
    }
}
