//! Predicate and type identities used by the core
//!
//! All names live in the AFF4 schema namespace so a third-party reader can
//! interpret a flushed graph without this crate.

use crate::urn::Urn;

macro_rules! aff4 {
    ($name:literal) => {
        Urn::from_static(concat!("http://aff4.org/Schema#", $name))
    };
}

pub const AFF4_NAMESPACE: &str = "http://aff4.org/Schema#";

/// rdf:type
pub const TYPE: Urn = Urn::from_static("http://www.w3.org/1999/02/22-rdf-syntax-ns#type");

// stream / volume facts
pub const STORED: Urn = aff4!("stored");
pub const SIZE: Urn = aff4!("size");
pub const CHUNK_SIZE: Urn = aff4!("chunkSize");
pub const CHUNKS_PER_SEGMENT: Urn = aff4!("chunksInSegment");
pub const COMPRESSION_METHOD: Urn = aff4!("compressionMethod");
pub const BEVY_COUNT: Urn = aff4!("bevyCount");
pub const STREAM_WRITE_MODE: Urn = aff4!("writeMode");

// encryption facts
pub const ENCRYPTION_CIPHER: Urn = aff4!("encryptionCipher");
pub const CHUNK_INTEGRITY: Urn = aff4!("chunkIntegrity");
pub const KEY_BAG: Urn = aff4!("keyBag");
/// Highest chunk revision the stream has ever written, never lowered
pub const MAX_REVISION: Urn = aff4!("maxChunkRevision");

// key bag facts
pub const SALT: Urn = aff4!("salt");
pub const ITERATIONS: Urn = aff4!("iterations");
pub const KDF_MEMORY: Urn = aff4!("kdfMemory");
pub const KDF_PARALLELISM: Urn = aff4!("kdfParallelism");
pub const WRAP_ALGORITHM: Urn = aff4!("wrapAlgorithm");
pub const WRAPPED_KEY: Urn = aff4!("wrappedKey");
pub const INTEGRITY_CHECK: Urn = aff4!("integrityCheck");
pub const KEY_SIZE: Urn = aff4!("keySizeInBytes");

// types
pub const IMAGE_STREAM_TYPE: Urn = aff4!("ImageStream");
pub const ENCRYPTED_STREAM_TYPE: Urn = aff4!("EncryptedStream");
pub const KEY_BAG_TYPE: Urn = aff4!("PasswordWrappedKeyBag");
