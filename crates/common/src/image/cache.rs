//! LRU cache of decoded bevies

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;

/// Plaintext of one bevy as read from the store
#[derive(Debug)]
pub(crate) struct DecodedBevy {
    pub chunks: Vec<Vec<u8>>,
    /// Stored (transformed) form of each chunk, reused when it is not modified
    pub stored: Vec<Bytes>,
    /// Revision each chunk was encrypted under, `None` for plain streams
    pub revisions: Vec<Option<u32>>,
}

/// Decoded bevies keyed by bevy index, evicting the least recently used.
/// Values are shared so a hit never copies chunk data.
#[derive(Debug)]
pub(crate) struct BevyCache {
    cache: HashMap<u64, Arc<DecodedBevy>>,
    lru_queue: VecDeque<u64>,
    max_entries: usize,
}

impl BevyCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: HashMap::new(),
            lru_queue: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&mut self, bevy: u64) -> Option<Arc<DecodedBevy>> {
        let data = self.cache.get(&bevy)?;
        self.lru_queue.retain(|&x| x != bevy);
        self.lru_queue.push_front(bevy);
        Some(Arc::clone(data))
    }

    pub fn insert(&mut self, bevy: u64, data: Arc<DecodedBevy>) {
        if self.cache.contains_key(&bevy) {
            self.lru_queue.retain(|&x| x != bevy);
        } else if self.cache.len() >= self.max_entries {
            if let Some(old) = self.lru_queue.pop_back() {
                self.cache.remove(&old);
            }
        }
        self.cache.insert(bevy, data);
        self.lru_queue.push_front(bevy);
    }

    /// Drop a bevy whose segments were rewritten
    pub fn invalidate(&mut self, bevy: u64) {
        if self.cache.remove(&bevy).is_some() {
            self.lru_queue.retain(|&x| x != bevy);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.cache.len()
    }
}
