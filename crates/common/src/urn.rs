use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Scheme used for freshly generated identities
pub const AFF4_SCHEME: &str = "aff4://";

/// Opaque identity of an addressable entity (volume, stream, key bag, predicate)
///
/// Identities are hierarchical by convention, a stream's URN is its volume's
/// URN with the stream name appended, but nothing here parses that structure.
/// The only composition offered is [`Urn::append`].
///
/// Static URNs (predicates, types) can be built in `const` context with
/// [`Urn::from_static`], so the lexicon never allocates.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Urn(Cow<'static, str>);

impl Urn {
    pub fn new(value: impl Into<String>) -> Self {
        Urn(Cow::Owned(value.into()))
    }

    pub const fn from_static(value: &'static str) -> Self {
        Urn(Cow::Borrowed(value))
    }

    /// Generate a fresh, globally unique identity
    pub fn random() -> Self {
        Urn::new(format!("{}{}", AFF4_SCHEME, uuid::Uuid::new_v4()))
    }

    /// Compose a child identity: `self` + `/` + `segment`
    ///
    /// Exactly one separator is placed between the two parts regardless of
    ///  trailing or leading slashes.
    pub fn append(&self, segment: impl AsRef<str>) -> Urn {
        let base = self.0.trim_end_matches('/');
        let segment = segment.as_ref().trim_start_matches('/');
        Urn::new(format!("{}/{}", base, segment))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

impl AsRef<str> for Urn {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Urn {
    fn from(value: &str) -> Self {
        Urn::new(value)
    }
}

impl From<String> for Urn {
    fn from(value: String) -> Self {
        Urn::new(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_append() {
        let volume = Urn::new("aff4://1234");
        assert_eq!(volume.append("image.dd").as_str(), "aff4://1234/image.dd");
        assert_eq!(
            Urn::new("aff4://1234/").append("/image.dd").as_str(),
            "aff4://1234/image.dd"
        );
        assert_eq!(
            volume.append("image.dd").append("00000000").as_str(),
            "aff4://1234/image.dd/00000000"
        );
    }

    #[test]
    fn test_static_and_owned_compare_equal() {
        const STATIC: Urn = Urn::from_static("aff4://static");
        assert_eq!(STATIC, Urn::new("aff4://static"));
    }

    #[test]
    fn test_random_is_unique() {
        let a = Urn::random();
        let b = Urn::random();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with(AFF4_SCHEME));
    }

    #[test]
    fn test_serde_transparent() {
        let urn = Urn::new("aff4://x/y");
        let json = serde_json::to_string(&urn).unwrap();
        assert_eq!(json, "\"aff4://x/y\"");
        let back: Urn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, urn);
    }
}
