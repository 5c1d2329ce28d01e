//! Named segment storage for AFF4 evidence volumes
//!
//! A volume is, from the point of view of the image engine, nothing more than
//! a flat namespace of byte blobs ("segments") addressed by name. This crate
//! provides that abstraction and two backends:
//!
//! - **Memory**: a thread-safe map, used for tests and transient volumes
//! - **Directory**: one file per segment below a root directory
//!
//! Segments have overwrite semantics: writing a name that already exists
//! replaces its contents. Listing is prefix based and always sorted, so a
//! stream can enumerate its bevies without keeping its own catalogue.
//!
//! # Example
//!
//! ```rust
//! use segment_store::{SegmentStore, SegmentStoreConfig};
//!
//! # fn example() -> Result<(), segment_store::SegmentStoreError> {
//! let store = SegmentStoreConfig::Memory.open()?;
//! store.write_segment("aff4://volume/image/00000000", "hello".into())?;
//! assert!(store.has_segment("aff4://volume/image/00000000")?);
//! # Ok(())
//! # }
//! ```

mod directory;
mod error;
mod memory;
mod storage;
mod store;

pub use directory::DirectoryStore;
pub use error::{Result, SegmentStoreError};
pub use memory::MemoryStore;
pub use storage::SegmentStoreConfig;
pub use store::SegmentStore;
