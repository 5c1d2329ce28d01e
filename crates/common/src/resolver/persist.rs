use bytes::Bytes;
use serde::{Deserialize, Serialize};

use segment_store::SegmentStore;

use super::graph::Fact;
use super::{Resolver, ResolverError};
use crate::urn::Urn;

/// Name of the segment, relative to the volume, holding the persisted graph
pub const INFORMATION_SEGMENT: &str = "information.json";

/// Version tag written into every flushed graph
pub const PERSISTED_GRAPH_VERSION: u32 = 1;

/// On-disk form of the persisted graph
///
/// ```json
/// { "version": 1, "volume": "aff4://…", "facts": [ { "subject": …, "predicate": …, "value": { "type": "integer", "value": 512 } } ] }
/// ```
#[derive(Debug, Serialize, Deserialize)]
struct GraphDocument {
    version: u32,
    volume: Urn,
    facts: Vec<Fact>,
}

impl Resolver {
    /// Write the persisted graph into `<volume>/information.json`
    pub fn flush(&self, store: &dyn SegmentStore, volume: &Urn) -> Result<(), ResolverError> {
        let document = GraphDocument {
            version: PERSISTED_GRAPH_VERSION,
            volume: volume.clone(),
            facts: self.facts(super::Graph::Persisted),
        };
        let data = serde_json::to_vec_pretty(&document)?;
        let name = volume.append(INFORMATION_SEGMENT);
        tracing::debug!(%volume, facts = document.facts.len(), "flushing persisted graph");
        store.write_segment(name.as_str(), Bytes::from(data))?;
        Ok(())
    }

    /// Merge a previously flushed graph into the persisted graph
    ///
    /// Facts are added, not set, so a conflicting fact already held in memory
    ///  shows up as ambiguous rather than being silently replaced.
    pub fn load(&self, store: &dyn SegmentStore, volume: &Urn) -> Result<usize, ResolverError> {
        let name = volume.append(INFORMATION_SEGMENT);
        let data = store.read_segment(name.as_str())?;
        let document: GraphDocument = serde_json::from_slice(&data)?;
        if document.version != PERSISTED_GRAPH_VERSION {
            return Err(ResolverError::UnsupportedVersion(document.version));
        }
        if &document.volume != volume {
            tracing::warn!(
                expected = %volume,
                found = %document.volume,
                "persisted graph was flushed under a different volume identity"
            );
        }

        let count = document.facts.len();
        for fact in document.facts {
            self.add(super::Graph::Persisted, &fact.subject, &fact.predicate, fact.value);
        }
        tracing::debug!(%volume, facts = count, "loaded persisted graph");
        Ok(count)
    }
}

#[cfg(test)]
mod test {
    use super::super::{Graph, Value};
    use super::*;
    use crate::lexicon;
    use segment_store::MemoryStore;

    #[test]
    fn test_flush_load_preserves_types() {
        let store = MemoryStore::new();
        let volume = Urn::new("aff4://volume");
        let image = volume.append("image.dd");

        let resolver = Resolver::new();
        resolver.set(Graph::Persisted, &image, &lexicon::CHUNK_SIZE, 512i64);
        resolver.set(Graph::Persisted, &image, &lexicon::COMPRESSION_METHOD, "zlib");
        resolver.set(Graph::Persisted, &image, &lexicon::CHUNK_INTEGRITY, true);
        resolver.set(Graph::Persisted, &image, &lexicon::SALT, vec![1u8, 2, 3]);
        resolver.set(Graph::Persisted, &image, &lexicon::STORED, &volume);
        resolver.set(Graph::Transient, &volume, &lexicon::STREAM_WRITE_MODE, "truncate");
        resolver.flush(&store, &volume).unwrap();

        let reloaded = Resolver::new();
        assert_eq!(reloaded.load(&store, &volume).unwrap(), 5);
        assert_eq!(reloaded.facts(Graph::Persisted), resolver.facts(Graph::Persisted));
        assert_eq!(
            reloaded.get_unique(&image, &lexicon::STORED).unwrap(),
            Value::Urn(volume.clone())
        );
        // transient facts never leave the session
        assert!(reloaded.is_empty(Graph::Transient));
    }

    #[test]
    fn test_flush_is_deterministic() {
        let store = MemoryStore::new();
        let volume = Urn::new("aff4://volume");
        let resolver = Resolver::new();
        for name in ["b", "a", "c"] {
            resolver.set(Graph::Persisted, &volume.append(name), &lexicon::SIZE, 1i64);
        }
        resolver.flush(&store, &volume).unwrap();
        let first = store.read_segment("aff4://volume/information.json").unwrap();
        resolver.flush(&store, &volume).unwrap();
        let second = store.read_segment("aff4://volume/information.json").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let store = MemoryStore::new();
        let volume = Urn::new("aff4://volume");
        store
            .write_segment(
                "aff4://volume/information.json",
                Bytes::from_static(br#"{"version":99,"volume":"aff4://volume","facts":[]}"#),
            )
            .unwrap();
        assert!(matches!(
            Resolver::new().load(&store, &volume),
            Err(ResolverError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_load_missing_graph() {
        let store = MemoryStore::new();
        let err = Resolver::new()
            .load(&store, &Urn::new("aff4://nothing"))
            .unwrap_err();
        assert!(matches!(err, ResolverError::Segment(e) if e.is_not_found()));
    }
}
