//! Per-stream content keys
//!
//! Every encrypted image stream has exactly one `ContentKey`. It never touches
//! disk in the clear: the only persisted form is the wrapped copy inside a
//! [`KeyBag`](super::KeyBag).

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a content key in bytes (256 bits)
pub const CONTENT_KEY_SIZE: usize = 32;

/// Errors that can occur while handling key material
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("system random source failed: {0}")]
    Random(getrandom::Error),
}

/// A 256-bit symmetric key used to encrypt every chunk of one stream
///
/// The bytes are wiped when the key is dropped, and `Debug` never prints them.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey([u8; CONTENT_KEY_SIZE]);

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

impl From<[u8; CONTENT_KEY_SIZE]> for ContentKey {
    fn from(bytes: [u8; CONTENT_KEY_SIZE]) -> Self {
        ContentKey(bytes)
    }
}

impl ContentKey {
    /// Generate a new random key from the system CSPRNG
    pub fn generate() -> Result<Self, SecretError> {
        let mut buff = [0; CONTENT_KEY_SIZE];
        fill_random(&mut buff)?;
        Ok(Self(buff))
    }

    /// Create a key from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `CONTENT_KEY_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != CONTENT_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid content key size, expected {}, got {}",
                CONTENT_KEY_SIZE,
                data.len()
            )
            .into());
        }
        let mut buff = [0; CONTENT_KEY_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

/// Fill `buff` from the operating system's random source
pub(crate) fn fill_random(buff: &mut [u8]) -> Result<(), SecretError> {
    getrandom::getrandom(buff).map_err(SecretError::Random)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_generate_is_random() {
        let a = ContentKey::generate().unwrap();
        let b = ContentKey::generate().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_size_validation() {
        assert!(ContentKey::from_slice(&[1u8; 16]).is_err());
        assert!(ContentKey::from_slice(&[1u8; 64]).is_err());
        let key = ContentKey::from_slice(&[1u8; CONTENT_KEY_SIZE]).unwrap();
        assert_eq!(key.bytes(), &[1u8; CONTENT_KEY_SIZE]);
    }

    #[test]
    fn test_debug_redacts() {
        let key = ContentKey::from([0xab; CONTENT_KEY_SIZE]);
        let printed = format!("{:?}", key);
        assert!(!printed.contains("ab"));
        assert!(!printed.contains("171"));
    }
}
