//! Shared test utilities for image stream integration tests
#![allow(dead_code)]

use std::sync::{Arc, Once};

use ::common::config::ImageConfig;
use ::common::crypto::KdfParams;
use ::common::image::{data_segment_name, index_segment_name, ImageStream, INDEX_ENTRY_SIZE};
use ::common::resolver::Resolver;
use ::common::urn::Urn;
use segment_store::{MemoryStore, SegmentStore};

static TRACING: Once = Once::new();

/// Install a test subscriber once, filtered by `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A volume backed by an in-memory store
pub struct TestVolume {
    pub resolver: Resolver,
    pub store: Arc<dyn SegmentStore>,
    pub volume: Urn,
}

/// Set up a fresh volume with an empty resolver and memory store
pub fn setup_volume() -> TestVolume {
    setup_volume_with(Arc::new(MemoryStore::new()))
}

pub fn setup_volume_with(store: Arc<dyn SegmentStore>) -> TestVolume {
    init_tracing();
    TestVolume {
        resolver: Resolver::new(),
        store,
        volume: Urn::random(),
    }
}

impl TestVolume {
    pub fn stream_urn(&self, name: &str) -> Urn {
        self.volume.append(name)
    }

    pub fn create(&self, name: &str, config: ImageConfig) -> ImageStream {
        ImageStream::create(
            self.resolver.clone(),
            self.store.clone(),
            self.stream_urn(name),
            self.volume.clone(),
            config,
        )
        .unwrap()
    }

    pub fn open(&self, name: &str) -> ImageStream {
        ImageStream::open(self.resolver.clone(), self.store.clone(), self.stream_urn(name)).unwrap()
    }

    /// Stored (transformed) chunks of one bevy, split by its index
    pub fn stored_chunks(&self, name: &str, bevy: u64) -> Vec<Vec<u8>> {
        let urn = self.stream_urn(name);
        let data = self.store.read_segment(&data_segment_name(&urn, bevy)).unwrap();
        let index = self.store.read_segment(&index_segment_name(&urn, bevy)).unwrap();
        index
            .chunks_exact(INDEX_ENTRY_SIZE)
            .map(|entry| {
                let offset = u64::from_le_bytes(entry[..8].try_into().unwrap()) as usize;
                let length = u32::from_le_bytes(entry[8..].try_into().unwrap()) as usize;
                data[offset..offset + length].to_vec()
            })
            .collect()
    }
}

/// Cheap Argon2id costs so tests don't spend their time hashing
pub fn fast_kdf() -> KdfParams {
    KdfParams::new(1, 64, 1)
}

pub fn config(chunk_size: u64, chunks_per_segment: u64) -> ImageConfig {
    ImageConfig {
        chunk_size,
        chunks_per_segment,
        ..ImageConfig::default()
    }
}

/// Deterministic incompressible bytes
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

/// Deterministic, highly compressible bytes
pub fn text(len: usize) -> Vec<u8> {
    b"evidence item 0042 acquired from /dev/sda; "
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

/// Half compressible, half noise, so both stored forms show up in one stream
pub fn mixed(len: usize, seed: u64) -> Vec<u8> {
    let mut out = text(len / 2);
    out.extend(noise(len - len / 2, seed));
    out
}
