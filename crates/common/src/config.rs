use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crypto::CipherId;
use crate::image::{CompressionMethod, WriteMode};

/// Largest accepted chunk size (64 MiB)
pub const MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;
/// Largest accepted number of chunks per bevy
pub const MAX_CHUNKS_PER_SEGMENT: u64 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Creation-time settings of an image stream
///
/// Every field has a default, so an empty TOML document is a valid config:
///
/// ```toml
/// chunk_size = 512
/// chunks_per_segment = 1024
/// compression = "zlib"
/// cipher = "chacha20-poly1305"
/// write_mode = "truncate"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Bytes of plaintext per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Chunks grouped into one bevy segment
    #[serde(default = "default_chunks_per_segment")]
    pub chunks_per_segment: u64,
    /// Per-chunk compression inside a bevy
    #[serde(default)]
    pub compression: CompressionMethod,
    /// Chunk cipher, `None` for a plain image stream
    #[serde(default)]
    pub cipher: Option<CipherId>,
    /// Used when the volume carries no transient write mode fact
    #[serde(default)]
    pub write_mode: WriteMode,
    /// Decoded bevies kept in memory for reads
    #[serde(default = "default_cache_bevies")]
    pub cache_bevies: usize,
}

fn default_chunk_size() -> u64 {
    32 * 1024
}

fn default_chunks_per_segment() -> u64 {
    1024
}

fn default_cache_bevies() -> usize {
    4
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunks_per_segment: default_chunks_per_segment(),
            compression: CompressionMethod::default(),
            cipher: None,
            write_mode: WriteMode::default(),
            cache_bevies: default_cache_bevies(),
        }
    }
}

impl ImageConfig {
    pub fn encrypted(cipher: CipherId) -> Self {
        Self {
            cipher: Some(cipher),
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: ImageConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_chunking(self.chunk_size, self.chunks_per_segment)?;
        if self.cache_bevies == 0 {
            return Err(ConfigError::Invalid("cache_bevies must be at least 1".into()));
        }
        Ok(())
    }
}

pub(crate) fn validate_chunking(chunk_size: u64, chunks_per_segment: u64) -> Result<(), ConfigError> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(ConfigError::Invalid(format!(
            "chunk_size must be between 1 and {}, got {}",
            MAX_CHUNK_SIZE, chunk_size
        )));
    }
    if chunks_per_segment == 0 || chunks_per_segment > MAX_CHUNKS_PER_SEGMENT {
        return Err(ConfigError::Invalid(format!(
            "chunks_per_segment must be between 1 and {}, got {}",
            MAX_CHUNKS_PER_SEGMENT, chunks_per_segment
        )));
    }
    Ok(())
}
