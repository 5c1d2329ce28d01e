//! Password-wrapped content keys
//!
//! A key bag protects one stream's [`ContentKey`] with a password:
//!
//! 1. **Derive**: Argon2id(password, random salt) yields a key-encryption key (KEK)
//! 2. **Wrap**: AES-256 Key Wrap (RFC 3394) encrypts the content key under the KEK
//! 3. **Persist**: salt, KDF costs and the wrapped key are stored as facts on
//!    the key bag's URN (or as a compact record via [`KeyBag::to_bytes`])
//!
//! Unwrapping repeats the derivation and lets AES-KW verify its integrity
//! register. A wrong password fails that check, so it can never produce a
//! different key; every unwrap failure is reported as the same
//! [`KeyBagError::BadPassword`] with no further detail.
//!
//! Stored KDF costs are bounded by [`KdfParams::validate`]; a key bag asking
//! for more is [`KeyBagError::Malformed`].
//!
//! The KEK is wiped on drop, and so is the AES key schedule built from it
//! (the `aes` crate's `zeroize` feature).
//!
//! # Wire Format
//!
//! AES-KW output for a 32 byte key is 40 bytes. The first 8 bytes are the
//! integrity register and are kept as `integrity_check`, the remaining 32 as
//! `wrapped_key`.

use std::fmt;
use std::str::FromStr;

use aes_kw::KekAes256 as Kek;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::kdf::{KdfError, KdfParams, SALT_SIZE};
use super::secret::{fill_random, ContentKey, SecretError, CONTENT_KEY_SIZE};
use crate::lexicon;
use crate::resolver::{Graph, Resolver, ResolverError};
use crate::urn::Urn;

/// Version byte leading every serialized key bag record
pub const KEY_BAG_VERSION: u8 = 1;
/// Size of the AES-KW integrity register
pub const INTEGRITY_CHECK_SIZE: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum KeyBagError {
    #[error("bad password")]
    BadPassword,
    #[error("unsupported key bag version {0}")]
    UnsupportedVersion(u8),
    #[error("unsupported wrap algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("key bag {key_bag} is stored in {found}, not {expected}")]
    WrongVolume {
        key_bag: Urn,
        expected: Urn,
        found: Urn,
    },
    #[error("malformed key bag: {0}")]
    Malformed(String),
    #[error("kdf error: {0}")]
    Kdf(#[from] KdfError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
    #[error("resolver error: {0}")]
    Resolver(#[from] ResolverError),
    #[error("key bag error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Algorithm used to wrap the content key under the KEK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WrapAlgorithm {
    #[default]
    #[serde(rename = "aes256-kw")]
    Aes256Kw,
}

impl WrapAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            WrapAlgorithm::Aes256Kw => "aes256-kw",
        }
    }
}

impl fmt::Display for WrapAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WrapAlgorithm {
    type Err = KeyBagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes256-kw" => Ok(WrapAlgorithm::Aes256Kw),
            other => Err(KeyBagError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// The persisted, password-wrapped form of a content key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBag {
    urn: Urn,
    salt: [u8; SALT_SIZE],
    kdf: KdfParams,
    wrap_algorithm: WrapAlgorithm,
    wrapped_key: [u8; CONTENT_KEY_SIZE],
    integrity_check: [u8; INTEGRITY_CHECK_SIZE],
}

impl KeyBag {
    /// Generate a fresh content key and wrap it under `password` with the
    ///  default KDF costs
    pub fn create(password: &str) -> Result<Self, KeyBagError> {
        Self::create_with(password, KdfParams::default())
    }

    /// Generate a fresh content key and wrap it under `password`
    pub fn create_with(password: &str, kdf: KdfParams) -> Result<Self, KeyBagError> {
        let key = ContentKey::generate()?;
        Self::wrap(&key, password, kdf)
    }

    /// Wrap an existing content key under `password`
    pub fn wrap(key: &ContentKey, password: &str, kdf: KdfParams) -> Result<Self, KeyBagError> {
        let mut salt = [0u8; SALT_SIZE];
        fill_random(&mut salt)?;

        let kek = kdf.derive(password.as_bytes(), &salt)?;
        let kek = Kek::from(*kek);
        let wrapped = Zeroizing::new(
            kek.wrap_vec(key.bytes())
                .map_err(|_| anyhow::anyhow!("AES-KW wrap error"))?,
        );

        // sanity check we're getting the expected AES-KW output size
        if wrapped.len() != INTEGRITY_CHECK_SIZE + CONTENT_KEY_SIZE {
            return Err(anyhow::anyhow!("unexpected wrapped key size {}", wrapped.len()).into());
        }

        let mut integrity_check = [0u8; INTEGRITY_CHECK_SIZE];
        integrity_check.copy_from_slice(&wrapped[..INTEGRITY_CHECK_SIZE]);
        let mut wrapped_key = [0u8; CONTENT_KEY_SIZE];
        wrapped_key.copy_from_slice(&wrapped[INTEGRITY_CHECK_SIZE..]);

        let bag = KeyBag {
            urn: Urn::random(),
            salt,
            kdf,
            wrap_algorithm: WrapAlgorithm::Aes256Kw,
            wrapped_key,
            integrity_check,
        };
        tracing::debug!(key_bag = %bag.urn, iterations = kdf.iterations, "created key bag");
        Ok(bag)
    }

    /// Recover the content key
    ///
    /// # Errors
    ///
    /// [`KeyBagError::BadPassword`] if the integrity check fails, which is the
    ///  case for every password other than the one used at creation.
    pub fn unwrap_key(&self, password: &str) -> Result<ContentKey, KeyBagError> {
        let kek = self.kdf.derive(password.as_bytes(), &self.salt)?;
        let kek = Kek::from(*kek);

        let mut wrapped = [0u8; INTEGRITY_CHECK_SIZE + CONTENT_KEY_SIZE];
        wrapped[..INTEGRITY_CHECK_SIZE].copy_from_slice(&self.integrity_check);
        wrapped[INTEGRITY_CHECK_SIZE..].copy_from_slice(&self.wrapped_key);

        let unwrapped = Zeroizing::new(
            kek.unwrap_vec(&wrapped)
                .map_err(|_| KeyBagError::BadPassword)?,
        );
        ContentKey::from_slice(&unwrapped).map_err(|_| KeyBagError::BadPassword)
    }

    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn wrap_algorithm(&self) -> WrapAlgorithm {
        self.wrap_algorithm
    }

    pub fn wrapped_key(&self) -> &[u8] {
        &self.wrapped_key
    }

    pub fn integrity_check(&self) -> &[u8] {
        &self.integrity_check
    }

    /// Serialize to a compact record: version byte followed by the bincode body
    pub fn to_bytes(&self) -> Result<Vec<u8>, KeyBagError> {
        let body = bincode::serialize(self).map_err(|e| anyhow::anyhow!(e))?;
        let mut out = Vec::with_capacity(1 + body.len());
        out.push(KEY_BAG_VERSION);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyBagError> {
        let (version, body) = bytes
            .split_first()
            .ok_or_else(|| KeyBagError::Malformed("empty record".into()))?;
        if *version != KEY_BAG_VERSION {
            return Err(KeyBagError::UnsupportedVersion(*version));
        }
        let bag: KeyBag =
            bincode::deserialize(body).map_err(|e| KeyBagError::Malformed(e.to_string()))?;
        bag.kdf
            .validate()
            .map_err(|e| KeyBagError::Malformed(e.to_string()))?;
        Ok(bag)
    }

    /// Record this key bag as persisted facts on its URN, stored in `volume`
    pub fn save(&self, resolver: &Resolver, volume: &Urn) {
        let g = Graph::Persisted;
        let s = &self.urn;
        resolver.set(g, s, &lexicon::TYPE, lexicon::KEY_BAG_TYPE);
        resolver.set(g, s, &lexicon::STORED, volume);
        resolver.set(g, s, &lexicon::SALT, self.salt.as_slice());
        resolver.set(g, s, &lexicon::ITERATIONS, i64::from(self.kdf.iterations));
        resolver.set(g, s, &lexicon::KDF_MEMORY, i64::from(self.kdf.memory_kib));
        resolver.set(g, s, &lexicon::KDF_PARALLELISM, i64::from(self.kdf.parallelism));
        resolver.set(g, s, &lexicon::WRAP_ALGORITHM, self.wrap_algorithm.as_str());
        resolver.set(g, s, &lexicon::WRAPPED_KEY, self.wrapped_key.as_slice());
        resolver.set(g, s, &lexicon::INTEGRITY_CHECK, self.integrity_check.as_slice());
        resolver.set(g, s, &lexicon::KEY_SIZE, CONTENT_KEY_SIZE as i64);
    }

    /// Rebuild a key bag from facts previously written by [`save`](Self::save)
    pub fn load_from_resolver(
        resolver: &Resolver,
        volume: &Urn,
        urn: &Urn,
    ) -> Result<Self, KeyBagError> {
        if let Some(stored) = resolver.get_optional(urn, &lexicon::STORED)? {
            let found = stored
                .as_urn()
                .cloned()
                .ok_or_else(|| KeyBagError::Malformed("stored is not a urn".into()))?;
            if &found != volume {
                return Err(KeyBagError::WrongVolume {
                    key_bag: urn.clone(),
                    expected: volume.clone(),
                    found,
                });
            }
        }

        let key_size = resolver.get_u64(urn, &lexicon::KEY_SIZE)?;
        if key_size != CONTENT_KEY_SIZE as u64 {
            return Err(KeyBagError::Malformed(format!("unsupported key size {}", key_size)));
        }
        let wrap_algorithm = resolver
            .get_string(urn, &lexicon::WRAP_ALGORITHM)?
            .parse::<WrapAlgorithm>()?;

        let kdf = KdfParams {
            iterations: read_u32(resolver, urn, &lexicon::ITERATIONS)?,
            memory_kib: read_u32(resolver, urn, &lexicon::KDF_MEMORY)?,
            parallelism: read_u32(resolver, urn, &lexicon::KDF_PARALLELISM)?,
        };
        kdf.validate()
            .map_err(|e| KeyBagError::Malformed(e.to_string()))?;

        Ok(KeyBag {
            urn: urn.clone(),
            salt: read_array(resolver, urn, &lexicon::SALT)?,
            kdf,
            wrap_algorithm,
            wrapped_key: read_array(resolver, urn, &lexicon::WRAPPED_KEY)?,
            integrity_check: read_array(resolver, urn, &lexicon::INTEGRITY_CHECK)?,
        })
    }
}

fn read_u32(resolver: &Resolver, urn: &Urn, predicate: &Urn) -> Result<u32, KeyBagError> {
    let value = resolver.get_u64(urn, predicate)?;
    u32::try_from(value)
        .map_err(|_| KeyBagError::Malformed(format!("{} out of range: {}", predicate, value)))
}

fn read_array<const N: usize>(
    resolver: &Resolver,
    urn: &Urn,
    predicate: &Urn,
) -> Result<[u8; N], KeyBagError> {
    let bytes = resolver.get_bytes(urn, predicate)?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| {
        KeyBagError::Malformed(format!(
            "{} has {} bytes, expected {}",
            predicate,
            bytes.len(),
            N
        ))
    })
}
