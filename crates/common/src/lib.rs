/**
 * Creation-time settings for image streams,
 *  loadable from TOML.
 */
pub mod config;
/**
 * Cryptographic types and operations.
 *  - Content keys and per-chunk ciphers
 *  - Password key bags (Argon2id + AES-KW)
 */
pub mod crypto;
/**
 * Chunked image streams: bevies, compression,
 *  the per-chunk encryption decorator and
 *  random access read / rewrite.
 */
pub mod image;
/**
 * Predicate and type names of the
 *  metadata schema.
 */
pub mod lexicon;
/**
 * In-memory triple store with a transient
 *  and a persisted graph.
 */
pub mod resolver;
/**
 * Failure injection for storage tests.
 */
pub mod testkit;
pub mod urn;

pub mod prelude {
    pub use crate::config::ImageConfig;
    pub use crate::crypto::{CipherId, ContentKey, KdfParams, KeyBag, KeyBagError};
    pub use crate::image::{CompressionMethod, ImageError, ImageStream, WriteMode};
    pub use crate::resolver::{Graph, Resolver, ResolverError, Value};
    pub use crate::urn::Urn;
    pub use segment_store::{DirectoryStore, MemoryStore, SegmentStore};
}
