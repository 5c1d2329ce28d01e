use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::value::Value;
use crate::urn::Urn;

/// Which graph a fact lives in
///
/// Both scopes expose the same operations; they differ only in lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Graph {
    /// Session-only facts, never flushed (e.g. write mode requested by the caller)
    Transient,
    /// Facts describing the volume's contents, loaded at open and flushed at close
    Persisted,
}

/// One (subject, predicate, value) fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub subject: Urn,
    pub predicate: Urn,
    pub value: Value,
}

/// Facts indexed by subject then predicate
///
/// Ordered maps keep iteration, and hence serialization, deterministic.
#[derive(Debug, Clone, Default)]
pub(crate) struct FactGraph {
    facts: BTreeMap<Urn, BTreeMap<Urn, Vec<Value>>>,
}

impl FactGraph {
    pub fn set(&mut self, subject: &Urn, predicate: &Urn, value: Value) {
        self.facts
            .entry(subject.clone())
            .or_default()
            .insert(predicate.clone(), vec![value]);
    }

    /// Returns false if the exact value was already present
    pub fn add(&mut self, subject: &Urn, predicate: &Urn, value: Value) -> bool {
        let values = self
            .facts
            .entry(subject.clone())
            .or_default()
            .entry(predicate.clone())
            .or_default();
        if values.contains(&value) {
            return false;
        }
        values.push(value);
        true
    }

    pub fn get(&self, subject: &Urn, predicate: &Urn) -> &[Value] {
        self.facts
            .get(subject)
            .and_then(|predicates| predicates.get(predicate))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn remove(&mut self, subject: &Urn, predicate: &Urn) -> Vec<Value> {
        let Some(predicates) = self.facts.get_mut(subject) else {
            return Vec::new();
        };
        let removed = predicates.remove(predicate).unwrap_or_default();
        if predicates.is_empty() {
            self.facts.remove(subject);
        }
        removed
    }

    pub fn subjects_with(&self, predicate: &Urn, value: &Value) -> Vec<Urn> {
        self.facts
            .iter()
            .filter(|(_, predicates)| {
                predicates
                    .get(predicate)
                    .map(|values| values.contains(value))
                    .unwrap_or(false)
            })
            .map(|(subject, _)| subject.clone())
            .collect()
    }

    pub fn facts(&self) -> impl Iterator<Item = Fact> + '_ {
        self.facts.iter().flat_map(|(subject, predicates)| {
            predicates.iter().flat_map(move |(predicate, values)| {
                values.iter().map(move |value| Fact {
                    subject: subject.clone(),
                    predicate: predicate.clone(),
                    value: value.clone(),
                })
            })
        })
    }

    pub fn len(&self) -> usize {
        self.facts
            .values()
            .flat_map(|predicates| predicates.values())
            .map(Vec::len)
            .sum()
    }

    pub fn clear(&mut self) {
        self.facts.clear();
    }
}
