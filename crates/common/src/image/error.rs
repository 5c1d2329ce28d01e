use segment_store::SegmentStoreError;

use super::compression::CodecError;
use crate::crypto::{CipherError, KeyBagError};
use crate::resolver::ResolverError;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("seek to {offset} outside stream of {size} bytes")]
    InvalidSeek { offset: i128, size: u64 },
    #[error("corrupt stream: {0}")]
    Corrupt(String),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("cipher error: {0}")]
    Cipher(CipherError),
    #[error("key bag error: {0}")]
    KeyBag(#[from] KeyBagError),
    #[error("resolver error: {0}")]
    Resolver(#[from] ResolverError),
    #[error("segment store error: {0}")]
    Segment(#[from] SegmentStoreError),
}

impl From<CipherError> for ImageError {
    fn from(e: CipherError) -> Self {
        match e {
            // using a stream before its key is known is a setup problem, not a crypto one
            CipherError::KeyNotSet => ImageError::Configuration(e.to_string()),
            other => ImageError::Cipher(other),
        }
    }
}

impl ImageError {
    /// True for a failed chunk authentication tag
    pub fn is_authentication(&self) -> bool {
        matches!(self, ImageError::Cipher(CipherError::Authentication { .. }))
    }

    /// True for a wrong password during unlock
    pub fn is_bad_password(&self) -> bool {
        matches!(self, ImageError::KeyBag(KeyBagError::BadPassword))
    }
}

impl From<ImageError> for std::io::Error {
    fn from(e: ImageError) -> Self {
        let kind = match &e {
            ImageError::InvalidSeek { .. } => std::io::ErrorKind::InvalidInput,
            ImageError::Corrupt(_) | ImageError::Codec(_) | ImageError::Cipher(_) => {
                std::io::ErrorKind::InvalidData
            }
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, e)
    }
}
