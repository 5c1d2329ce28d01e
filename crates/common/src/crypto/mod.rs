//! Cryptographic primitives for encrypted image streams
//!
//! This module provides the cryptographic foundation for encrypted evidence:
//!
//! - **Content keys**: one random 256-bit [`ContentKey`] per encrypted stream
//! - **Chunk ciphers**: ChaCha20-Poly1305, AES-256-GCM or bare ChaCha20 with a
//!   per-chunk IV derived from the chunk index and a rewrite revision
//! - **Key bags**: Argon2id + AES Key Wrap protecting a content key with a password
//!
//! # Security Model
//!
//! ## Content Encryption
//! Each chunk is encrypted on its own so random access never needs more than
//! one chunk of ciphertext. IVs are derived, not random, which keeps the
//! on-disk layout deterministic; uniqueness comes from the (index, revision)
//! pair. With an authenticated cipher a wrong key, a modified chunk or a chunk
//! moved to another index fails to decrypt.
//!
//! ## Password Protection
//! The content key is never stored in the clear. A [`KeyBag`] stores the key
//! wrapped under a KEK derived from the password; the AES-KW integrity check
//! turns any wrong password into [`KeyBagError::BadPassword`] before a single
//! chunk is touched.

mod cipher;
mod kdf;
mod keybag;
mod secret;

pub use cipher::{derive_iv, CipherError, CipherId, IV_SIZE, TAG_SIZE};
pub use kdf::{
    KdfError, KdfParams, MAX_ITERATIONS, MAX_MEMORY_KIB, MAX_PARALLELISM, SALT_SIZE,
};
pub use keybag::{KeyBag, KeyBagError, WrapAlgorithm, INTEGRITY_CHECK_SIZE, KEY_BAG_VERSION};
pub use secret::{ContentKey, SecretError, CONTENT_KEY_SIZE};
