//! Chunked, optionally encrypted image streams
//!
//! An [`ImageStream`] presents one linear byte stream. Internally it is cut
//! into fixed-size chunks and `chunks_per_segment` chunks are grouped into a
//! bevy, the unit written to the segment store:
//!
//! ```text
//!  offset ─► chunk = offset / chunk_size ─► bevy = chunk / chunks_per_segment
//!
//!  per chunk:  plaintext ─► compress ─► [encrypt] ─► appended to bevy
//! ```
//!
//! Each chunk is transformed independently, so reading any byte only decodes
//! the chunks of one bevy. Writing behind the end of the stream reloads the
//! owning bevy, patches it and re-encodes it on the next flush.

mod bevy;
mod cache;
mod compression;
mod encrypted;
mod error;
mod stream;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use bevy::{data_segment_name, index_segment_name, INDEX_ENTRY_SIZE};
pub use compression::{CodecError, CompressionMethod};
pub use encrypted::{EncryptedStream, REVISION_HEADER_SIZE};
pub use error::ImageError;
pub use stream::{ImageStream, DEFAULT_CACHE_BEVIES};

/// How a stream opened for writing treats existing content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Start over at size zero
    #[default]
    Truncate,
    /// Keep existing content and continue writing at its end
    Append,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Truncate => "truncate",
            WriteMode::Append => "append",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "truncate" => Ok(WriteMode::Truncate),
            "append" => Ok(WriteMode::Append),
            other => Err(ImageError::Configuration(format!(
                "unknown write mode: {}",
                other
            ))),
        }
    }
}
