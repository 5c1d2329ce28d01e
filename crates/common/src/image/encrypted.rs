//! Per-chunk encryption decorator
//!
//! Every stored chunk of an encrypted stream is
//!
//! ```text
//! revision (u32 LE) || cipher output
//! ```
//!
//! The revision travels with the chunk so the IV can be rebuilt on read, and
//! so a rewrite of a chunk that already exists in the store can move to the
//! next revision instead of reusing an IV.

use super::error::ImageError;
use crate::crypto::{CipherError, CipherId, ContentKey};
use crate::urn::Urn;

/// Size of the revision header in front of every encrypted chunk
pub const REVISION_HEADER_SIZE: usize = 4;

#[derive(Debug, Clone)]
pub struct EncryptedStream {
    cipher: CipherId,
    integrity: bool,
    key: Option<ContentKey>,
    key_bag: Option<Urn>,
}

impl EncryptedStream {
    pub fn new(cipher: CipherId) -> Self {
        Self {
            cipher,
            integrity: cipher.is_authenticated(),
            key: None,
            key_bag: None,
        }
    }

    /// Rebuild from persisted facts. The declared integrity flag has to
    ///  match what the cipher actually provides.
    pub fn from_declared(cipher: CipherId, integrity: bool) -> Result<Self, ImageError> {
        if integrity != cipher.is_authenticated() {
            return Err(ImageError::Configuration(format!(
                "stream declares chunk integrity = {} but cipher {} {} authenticated",
                integrity,
                cipher,
                if cipher.is_authenticated() { "is" } else { "is not" }
            )));
        }
        Ok(Self::new(cipher))
    }

    pub fn cipher(&self) -> CipherId {
        self.cipher
    }

    /// Whether decryption detects modified chunks
    pub fn integrity(&self) -> bool {
        self.integrity
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn set_key(&mut self, key: ContentKey) {
        self.key = Some(key);
    }

    pub fn key_bag(&self) -> Option<&Urn> {
        self.key_bag.as_ref()
    }

    pub fn set_key_bag(&mut self, key_bag: Urn) {
        self.key_bag = Some(key_bag);
    }

    /// Bytes added to every chunk
    pub fn overhead(&self) -> usize {
        REVISION_HEADER_SIZE + self.cipher.tag_size()
    }

    fn key(&self) -> Result<&ContentKey, CipherError> {
        self.key.as_ref().ok_or(CipherError::KeyNotSet)
    }

    pub fn encrypt_chunk(
        &self,
        index: u64,
        revision: u32,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        let sealed = self.cipher.seal(self.key()?, index, revision, plaintext)?;
        let mut out = Vec::with_capacity(REVISION_HEADER_SIZE + sealed.len());
        out.extend_from_slice(&revision.to_le_bytes());
        out.extend_from_slice(&sealed);
        tracing::trace!(chunk = index, revision, len = out.len(), "encrypted chunk");
        Ok(out)
    }

    /// Returns the revision the chunk was written under and its plaintext
    pub fn decrypt_chunk(&self, index: u64, stored: &[u8]) -> Result<(u32, Vec<u8>), CipherError> {
        let key = self.key()?;
        let revision = Self::revision_of(index, stored)?;
        let plaintext = self
            .cipher
            .open(key, index, revision, &stored[REVISION_HEADER_SIZE..])?;
        Ok((revision, plaintext))
    }

    /// Read the revision header without decrypting
    pub fn revision_of(index: u64, stored: &[u8]) -> Result<u32, CipherError> {
        let header: [u8; REVISION_HEADER_SIZE] = stored
            .get(..REVISION_HEADER_SIZE)
            .and_then(|h| h.try_into().ok())
            .ok_or(CipherError::Truncated {
                chunk: index,
                len: stored.len(),
            })?;
        Ok(u32::from_le_bytes(header))
    }

    /// Revision to use when `previous` is the revision already in the store
    pub fn next_revision(index: u64, previous: Option<u32>) -> Result<u32, CipherError> {
        match previous {
            None => Ok(0),
            Some(r) => r
                .checked_add(1)
                .ok_or(CipherError::RevisionExhausted { chunk: index }),
        }
    }
}
