use std::{collections::HashMap, hash::Hash};

/// Fixed-capacity map evicting the oldest inserted key. Lookups do not
/// refresh an entry's position.
pub struct FifoCache<K, V> {
    slots: Vec<Option<K>>,
    next: usize,
    entries: HashMap<K, V>,
}

impl<K: Clone + Eq + Hash, V> FifoCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        FifoCache {
            slots: vec![None; capacity],
            next: 0,
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: K, value: V) {
        if self.slots.is_empty() {
            return;
        }
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = value;
            return;
        }

        if let Some(evicted) = self.slots[self.next].take() {
            self.entries.remove(&evicted);
        }
        self.slots[self.next] = Some(key.clone());
        self.entries.insert(key, value);
        self.next = (self.next + 1) % self.slots.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_insert_not_least_recent_use() {
        let mut cache = FifoCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);

        // touching "a" must not save it
        assert_eq!(cache.get(&"a"), Some(&1));
        cache.insert("c", 3);

        assert!(!cache.contains(&"a"));
        assert_eq!(cache.get(&"b"), Some(&2));
        assert_eq!(cache.get(&"c"), Some(&3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reinserting_keeps_slot() {
        let mut cache = FifoCache::new(2);
        cache.insert(1, "one");
        cache.insert(2, "two");
        cache.insert(1, "uno");
        cache.insert(3, "three");

        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(&"two"));
        assert_eq!(cache.get(&3), Some(&"three"));
    }

    #[test]
    fn zero_capacity_caches_nothing() {
        let mut cache = FifoCache::new(0);
        cache.insert(1, 1);
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 0);
    }
}
