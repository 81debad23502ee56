//! Bounded gossip deduplication cache.

use std::num::NonZeroUsize;

use lru::LruCache;

/// Default capacity of the seen-message cache.
pub const SEEN_CACHE_CAPACITY: usize = 10_000;

/// LRU set of recently observed gossip ids.
pub struct SeenCache {
    cache: LruCache<String, ()>,
}

impl SeenCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1"),
            ),
        }
    }

    /// Record an id; returns `true` the first time it is seen.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.cache.contains(id) {
            // refresh recency
            self.cache.get(id);
            return false;
        }
        self.cache.put(id.to_string(), ());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.cache.contains(id)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for SeenCache {
    fn default() -> Self {
        Self::new(SEEN_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_insert_is_fresh() {
        let mut cache = SeenCache::new(4);
        assert!(cache.insert("a"));
        assert!(!cache.insert("a"));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut cache = SeenCache::new(2);
        cache.insert("a");
        cache.insert("b");
        cache.insert("c");
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("a"));
        assert!(cache.contains("c"));
    }
}
