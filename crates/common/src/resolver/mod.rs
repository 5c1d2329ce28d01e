//! Metadata graph shared by every stream in a volume
//!
//! The resolver is an in-memory triple store. Facts are (subject, predicate,
//! typed value) and live in one of two graphs:
//!
//! - [`Graph::Transient`]: session-only, never written anywhere
//! - [`Graph::Persisted`]: loaded from and flushed to the volume's segment store
//!
//! The graph is always passed explicitly, there is no ambient "current graph".
//! Callers pick between overwrite (`set`) and accumulate (`add`) semantics and
//! between the permissive `get` and the strict `get_unique`.

mod graph;
mod persist;
mod value;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::urn::Urn;

pub use graph::{Fact, Graph};
pub use persist::{INFORMATION_SEGMENT, PERSISTED_GRAPH_VERSION};
pub use value::Value;

use graph::FactGraph;

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("ambiguous fact: {count} values for {subject} {predicate}")]
    Ambiguous {
        subject: Urn,
        predicate: Urn,
        count: usize,
    },
    #[error("missing fact: {subject} {predicate}")]
    Missing { subject: Urn, predicate: Urn },
    #[error("type mismatch for {subject} {predicate}: expected {expected}, found {found}")]
    TypeMismatch {
        subject: Urn,
        predicate: Urn,
        expected: &'static str,
        found: &'static str,
    },
    #[error("unsupported persisted graph version {0}")]
    UnsupportedVersion(u32),
    #[error("graph serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("segment store error: {0}")]
    Segment(#[from] segment_store::SegmentStoreError),
}

#[derive(Debug, Default)]
struct ResolverInner {
    transient: FactGraph,
    persisted: FactGraph,
}

impl ResolverInner {
    fn graph(&self, graph: Graph) -> &FactGraph {
        match graph {
            Graph::Transient => &self.transient,
            Graph::Persisted => &self.persisted,
        }
    }

    fn graph_mut(&mut self, graph: Graph) -> &mut FactGraph {
        match graph {
            Graph::Transient => &mut self.transient,
            Graph::Persisted => &mut self.persisted,
        }
    }
}

/// Cheaply cloneable handle to a shared fact store
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    inner: Arc<RwLock<ResolverInner>>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every value of (subject, predicate) with `value`
    pub fn set(&self, graph: Graph, subject: &Urn, predicate: &Urn, value: impl Into<Value>) {
        let value = value.into();
        tracing::trace!(?graph, %subject, %predicate, ?value, "set");
        self.inner
            .write()
            .graph_mut(graph)
            .set(subject, predicate, value);
    }

    /// Add `value` alongside any existing values. Duplicates are ignored.
    pub fn add(&self, graph: Graph, subject: &Urn, predicate: &Urn, value: impl Into<Value>) {
        let value = value.into();
        self.inner
            .write()
            .graph_mut(graph)
            .add(subject, predicate, value);
    }

    /// All values of (subject, predicate) in one graph, possibly none
    pub fn get(&self, graph: Graph, subject: &Urn, predicate: &Urn) -> Vec<Value> {
        self.inner.read().graph(graph).get(subject, predicate).to_vec()
    }

    /// The single value of (subject, predicate) across both graphs
    ///
    /// Distinct values are counted, so the same value set in both graphs is
    ///  still unique.
    pub fn get_unique(&self, subject: &Urn, predicate: &Urn) -> Result<Value, ResolverError> {
        let inner = self.inner.read();
        let mut values: Vec<&Value> = Vec::new();
        for value in inner
            .persisted
            .get(subject, predicate)
            .iter()
            .chain(inner.transient.get(subject, predicate))
        {
            if !values.contains(&value) {
                values.push(value);
            }
        }

        match values.as_slice() {
            [] => Err(ResolverError::Missing {
                subject: subject.clone(),
                predicate: predicate.clone(),
            }),
            [value] => Ok((*value).clone()),
            many => Err(ResolverError::Ambiguous {
                subject: subject.clone(),
                predicate: predicate.clone(),
                count: many.len(),
            }),
        }
    }

    /// Like [`get_unique`](Self::get_unique) but a missing fact is `None`
    pub fn get_optional(&self, subject: &Urn, predicate: &Urn) -> Result<Option<Value>, ResolverError> {
        match self.get_unique(subject, predicate) {
            Ok(value) => Ok(Some(value)),
            Err(ResolverError::Missing { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get_u64(&self, subject: &Urn, predicate: &Urn) -> Result<u64, ResolverError> {
        let value = self.get_unique(subject, predicate)?;
        value
            .as_u64()
            .ok_or_else(|| mismatch(subject, predicate, "non-negative integer", &value))
    }

    pub fn get_string(&self, subject: &Urn, predicate: &Urn) -> Result<String, ResolverError> {
        let value = self.get_unique(subject, predicate)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch(subject, predicate, "string", &value))
    }

    pub fn get_bool(&self, subject: &Urn, predicate: &Urn) -> Result<bool, ResolverError> {
        let value = self.get_unique(subject, predicate)?;
        value
            .as_bool()
            .ok_or_else(|| mismatch(subject, predicate, "boolean", &value))
    }

    pub fn get_bytes(&self, subject: &Urn, predicate: &Urn) -> Result<Vec<u8>, ResolverError> {
        let value = self.get_unique(subject, predicate)?;
        value
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| mismatch(subject, predicate, "bytes", &value))
    }

    pub fn get_urn(&self, subject: &Urn, predicate: &Urn) -> Result<Urn, ResolverError> {
        let value = self.get_unique(subject, predicate)?;
        value
            .as_urn()
            .cloned()
            .ok_or_else(|| mismatch(subject, predicate, "urn", &value))
    }

    /// Remove and return every value of (subject, predicate) in one graph
    pub fn remove(&self, graph: Graph, subject: &Urn, predicate: &Urn) -> Vec<Value> {
        self.inner.write().graph_mut(graph).remove(subject, predicate)
    }

    /// Subjects having `value` among their values for `predicate`
    pub fn subjects_with(&self, graph: Graph, predicate: &Urn, value: &Value) -> Vec<Urn> {
        self.inner.read().graph(graph).subjects_with(predicate, value)
    }

    /// Snapshot of every fact in a graph, in deterministic order
    pub fn facts(&self, graph: Graph) -> Vec<Fact> {
        self.inner.read().graph(graph).facts().collect()
    }

    pub fn len(&self, graph: Graph) -> usize {
        self.inner.read().graph(graph).len()
    }

    pub fn is_empty(&self, graph: Graph) -> bool {
        self.len(graph) == 0
    }

    pub fn clear(&self, graph: Graph) {
        self.inner.write().graph_mut(graph).clear();
    }
}

fn mismatch(subject: &Urn, predicate: &Urn, expected: &'static str, found: &Value) -> ResolverError {
    ResolverError::TypeMismatch {
        subject: subject.clone(),
        predicate: predicate.clone(),
        expected,
        found: found.kind(),
    }
}
