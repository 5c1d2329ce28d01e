//! Error types for the segment store.

use std::path::PathBuf;

/// Errors that can occur when working with a segment store.
#[derive(Debug, thiserror::Error)]
pub enum SegmentStoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Segment not found
    #[error("segment not found: {0}")]
    NotFound(String),

    /// Segment name cannot be stored by this backend
    #[error("invalid segment name: {0:?}")]
    InvalidName(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Path error
    #[error("path error: {0}")]
    Path(PathBuf),
}

impl SegmentStoreError {
    /// Whether the error only reports a missing segment.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SegmentStoreError::NotFound(_))
    }
}

/// Result type alias for segment store operations.
pub type Result<T> = std::result::Result<T, SegmentStoreError>;
