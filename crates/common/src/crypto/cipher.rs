//! Symmetric chunk ciphers
//!
//! Chunks are encrypted independently so any one of them can be decrypted
//! without touching its neighbours. The IV of a chunk is derived, never
//! random:
//!
//! ```text
//! iv = chunk_index (u64 LE) || revision (u32 LE)      -- 12 bytes
//! ```
//!
//! The mapping is injective over (chunk index, revision), so as long as a
//! chunk is never written twice under the same revision no (key, IV) pair is
//! ever reused. Revisions are managed by the encrypted stream.

use std::fmt;
use std::str::FromStr;

use aes_gcm::Aes256Gcm;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use serde::{Deserialize, Serialize};

use super::secret::ContentKey;

/// Size of a derived chunk IV in bytes
pub const IV_SIZE: usize = 12;
/// Size of the AEAD authentication tag in bytes
pub const TAG_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("no content key has been set for this stream")]
    KeyNotSet,
    #[error("authentication failed for chunk {chunk}")]
    Authentication { chunk: u64 },
    #[error("chunk {chunk} is truncated ({len} bytes)")]
    Truncated { chunk: u64, len: usize },
    #[error("revision counter exhausted for chunk {chunk}")]
    RevisionExhausted { chunk: u64 },
    #[error("unknown cipher: {0}")]
    UnknownCipher(String),
    #[error("cipher error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Identifier of the transform applied to each chunk of an encrypted stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CipherId {
    /// ChaCha20-Poly1305 AEAD, 16 byte tag per chunk
    #[default]
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
    /// AES-256-GCM AEAD, 16 byte tag per chunk
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    /// Bare ChaCha20 keystream, length preserving, no integrity
    #[serde(rename = "chacha20")]
    ChaCha20,
}

impl CipherId {
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherId::ChaCha20Poly1305 => "chacha20-poly1305",
            CipherId::Aes256Gcm => "aes-256-gcm",
            CipherId::ChaCha20 => "chacha20",
        }
    }

    /// Whether decrypting detects a wrong key or modified ciphertext
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, CipherId::ChaCha20)
    }

    /// Bytes added to each chunk by [`seal`](Self::seal)
    pub fn tag_size(&self) -> usize {
        if self.is_authenticated() {
            TAG_SIZE
        } else {
            0
        }
    }

    /// Encrypt one chunk under `key` and the IV for (chunk, revision)
    pub fn seal(
        &self,
        key: &ContentKey,
        chunk: u64,
        revision: u32,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        let iv = derive_iv(chunk, revision);
        match self {
            CipherId::ChaCha20Poly1305 => {
                let cipher = ChaCha20Poly1305::new_from_slice(key.bytes())
                    .map_err(|_| anyhow::anyhow!("invalid key length"))?;
                cipher
                    .encrypt(chacha20poly1305::Nonce::from_slice(&iv), plaintext)
                    .map_err(|_| anyhow::anyhow!("encrypt error").into())
            }
            CipherId::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(key.bytes())
                    .map_err(|_| anyhow::anyhow!("invalid key length"))?;
                cipher
                    .encrypt(aes_gcm::Nonce::from_slice(&iv), plaintext)
                    .map_err(|_| anyhow::anyhow!("encrypt error").into())
            }
            CipherId::ChaCha20 => {
                let mut out = plaintext.to_vec();
                keystream(key, &iv)?.apply_keystream(&mut out);
                Ok(out)
            }
        }
    }

    /// Reverse [`seal`](Self::seal). Authenticated ciphers fail with
    ///  [`CipherError::Authentication`] on a wrong key or modified input.
    pub fn open(
        &self,
        key: &ContentKey,
        chunk: u64,
        revision: u32,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        if ciphertext.len() < self.tag_size() {
            return Err(CipherError::Truncated {
                chunk,
                len: ciphertext.len(),
            });
        }
        let iv = derive_iv(chunk, revision);
        match self {
            CipherId::ChaCha20Poly1305 => {
                let cipher = ChaCha20Poly1305::new_from_slice(key.bytes())
                    .map_err(|_| anyhow::anyhow!("invalid key length"))?;
                cipher
                    .decrypt(chacha20poly1305::Nonce::from_slice(&iv), ciphertext)
                    .map_err(|_| CipherError::Authentication { chunk })
            }
            CipherId::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(key.bytes())
                    .map_err(|_| anyhow::anyhow!("invalid key length"))?;
                cipher
                    .decrypt(aes_gcm::Nonce::from_slice(&iv), ciphertext)
                    .map_err(|_| CipherError::Authentication { chunk })
            }
            CipherId::ChaCha20 => {
                let mut out = ciphertext.to_vec();
                keystream(key, &iv)?.apply_keystream(&mut out);
                Ok(out)
            }
        }
    }
}

impl fmt::Display for CipherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherId {
    type Err = CipherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chacha20-poly1305" => Ok(CipherId::ChaCha20Poly1305),
            "aes-256-gcm" => Ok(CipherId::Aes256Gcm),
            "chacha20" => Ok(CipherId::ChaCha20),
            other => Err(CipherError::UnknownCipher(other.to_string())),
        }
    }
}

/// Deterministic, injective IV for (chunk index, revision)
pub fn derive_iv(chunk: u64, revision: u32) -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    iv[..8].copy_from_slice(&chunk.to_le_bytes());
    iv[8..].copy_from_slice(&revision.to_le_bytes());
    iv
}

fn keystream(key: &ContentKey, iv: &[u8; IV_SIZE]) -> Result<ChaCha20, CipherError> {
    ChaCha20::new_from_slices(key.bytes(), iv)
        .map_err(|_| anyhow::anyhow!("invalid key or nonce length").into())
}
