//! Password-based key derivation (Argon2id)

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Size of the random salt stored with every key bag
pub const SALT_SIZE: usize = 16;
/// Size of the derived key-encryption key
pub const KEK_SIZE: usize = 32;

/// Default Argon2id time cost (passes over memory)
pub const DEFAULT_ITERATIONS: u32 = 3;
/// Default Argon2id memory cost in KiB (64 MiB)
pub const DEFAULT_MEMORY_KIB: u32 = 64 * 1024;
/// Default Argon2id lanes
pub const DEFAULT_PARALLELISM: u32 = 1;

/// Largest time cost accepted from a key bag
pub const MAX_ITERATIONS: u32 = 64;
/// Largest memory cost accepted from a key bag (1 GiB)
pub const MAX_MEMORY_KIB: u32 = 1024 * 1024;
/// Largest lane count accepted from a key bag
pub const MAX_PARALLELISM: u32 = 16;

#[derive(Debug, thiserror::Error)]
pub enum KdfError {
    #[error("invalid key derivation parameters: {0}")]
    InvalidParams(String),
    #[error("key derivation failed: {0}")]
    Derive(String),
}

/// Cost parameters for deriving a key-encryption key from a password
///
/// `iterations` is the Argon2id time cost. All three values are persisted in
/// the key bag so any later process derives the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub iterations: u32,
    pub memory_kib: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            memory_kib: DEFAULT_MEMORY_KIB,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

impl KdfParams {
    pub fn new(iterations: u32, memory_kib: u32, parallelism: u32) -> Self {
        Self {
            iterations,
            memory_kib,
            parallelism,
        }
    }

    /// Check the costs are within what a key bag may ask for. Stored costs
    ///  come from the container, so they are bounded before any memory is
    ///  allocated for them.
    pub fn validate(&self) -> Result<(), KdfError> {
        if self.iterations < 1 {
            return Err(KdfError::InvalidParams("iteration count must be at least 1".into()));
        }
        if self.iterations > MAX_ITERATIONS {
            return Err(KdfError::InvalidParams(format!(
                "iteration count {} exceeds {}",
                self.iterations, MAX_ITERATIONS
            )));
        }
        if self.memory_kib > MAX_MEMORY_KIB {
            return Err(KdfError::InvalidParams(format!(
                "memory cost {} KiB exceeds {} KiB",
                self.memory_kib, MAX_MEMORY_KIB
            )));
        }
        if self.parallelism > MAX_PARALLELISM {
            return Err(KdfError::InvalidParams(format!(
                "parallelism {} exceeds {}",
                self.parallelism, MAX_PARALLELISM
            )));
        }
        Ok(())
    }

    fn argon2(&self) -> Result<Argon2<'static>, KdfError> {
        self.validate()?;
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEK_SIZE),
        )
        .map_err(|e| KdfError::InvalidParams(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Derive a key-encryption key. The result is wiped on drop.
    pub fn derive(
        &self,
        password: &[u8],
        salt: &[u8],
    ) -> Result<Zeroizing<[u8; KEK_SIZE]>, KdfError> {
        let argon2 = self.argon2()?;
        let mut kek = Zeroizing::new([0u8; KEK_SIZE]);
        argon2
            .hash_password_into(password, salt, &mut kek[..])
            .map_err(|e| KdfError::Derive(e.to_string()))?;
        Ok(kek)
    }
}
