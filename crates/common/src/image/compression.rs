//! Per-chunk compression

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, ZlibEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unknown compression method: {0}")]
    UnknownMethod(String),
    #[error("chunk {chunk}: decompressed to {found} bytes, expected {expected}")]
    Length {
        chunk: u64,
        expected: usize,
        found: usize,
    },
    #[error("chunk {chunk}: {source}")]
    Io {
        chunk: u64,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    None,
    /// zlib stream (RFC 1950)
    #[default]
    Zlib,
    /// raw deflate (RFC 1951)
    Deflate,
}

impl CompressionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMethod::None => "none",
            CompressionMethod::Zlib => "zlib",
            CompressionMethod::Deflate => "deflate",
        }
    }

    /// Compress one chunk. Whether the result is kept is up to the caller.
    pub fn compress(&self, chunk: u64, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let io = |source| CodecError::Io { chunk, source };
        match self {
            CompressionMethod::None => Ok(data.to_vec()),
            CompressionMethod::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data).map_err(io)?;
                encoder.finish().map_err(io)
            }
            CompressionMethod::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data).map_err(io)?;
                encoder.finish().map_err(io)
            }
        }
    }

    /// Decompress one chunk whose plaintext is exactly `expected` bytes
    pub fn decompress(
        &self,
        chunk: u64,
        data: &[u8],
        expected: usize,
    ) -> Result<Vec<u8>, CodecError> {
        let io = |source| CodecError::Io { chunk, source };
        // one spare byte so overlong output is detected without inflating it all
        let limit = expected as u64 + 1;
        let mut out = Vec::with_capacity(expected);
        match self {
            CompressionMethod::None => out.extend_from_slice(data),
            CompressionMethod::Zlib => {
                ZlibDecoder::new(data)
                    .take(limit)
                    .read_to_end(&mut out)
                    .map_err(io)?;
            }
            CompressionMethod::Deflate => {
                DeflateDecoder::new(data)
                    .take(limit)
                    .read_to_end(&mut out)
                    .map_err(io)?;
            }
        }
        if out.len() != expected {
            return Err(CodecError::Length {
                chunk,
                expected,
                found: out.len(),
            });
        }
        Ok(out)
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionMethod {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(CompressionMethod::None),
            "zlib" => Ok(CompressionMethod::Zlib),
            "deflate" => Ok(CompressionMethod::Deflate),
            other => Err(CodecError::UnknownMethod(other.to_string())),
        }
    }
}
