//! LRU Tracker Module
//!
//! Orders entries for Least Recently Used eviction.

use std::collections::HashMap;

// == LRU Tracker ==
/// Tracks insertion order so LRU eviction can break `last_accessed` ties.
///
/// Recency itself lives on each entry (`last_accessed`); the tracker only
/// remembers when each key was last (re)inserted. Victims are ordered by
/// ascending `last_accessed`, then by ascending insertion sequence.
#[derive(Debug, Default)]
pub struct LruTracker {
    /// Insertion sequence per key
    seqs: HashMap<String, u64>,
    /// Next sequence number to hand out
    next_seq: u64,
}

impl LruTracker {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Record Insert ==
    /// Marks a key as freshly inserted (or replaced).
    pub fn record_insert(&mut self, key: &str) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.seqs.insert(key.to_string(), seq);
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove(&mut self, key: &str) {
        self.seqs.remove(key);
    }

    // == Clear ==
    pub fn clear(&mut self) {
        self.seqs.clear();
    }

    /// Insertion sequence of a key, if tracked.
    pub fn seq(&self, key: &str) -> Option<u64> {
        self.seqs.get(key).copied()
    }

    // == Victims ==
    /// Returns up to `count` keys in eviction order.
    ///
    /// `candidates` yields `(key, last_accessed)` pairs for live entries.
    pub fn victims<'a, I>(&self, candidates: I, count: usize) -> Vec<String>
    where
        I: IntoIterator<Item = (&'a String, u64)>,
    {
        if count == 0 {
            return Vec::new();
        }

        let mut ordered: Vec<(u64, u64, &String)> = candidates
            .into_iter()
            .map(|(key, last_accessed)| {
                let seq = self.seq(key).unwrap_or(u64::MAX);
                (last_accessed, seq, key)
            })
            .collect();

        ordered.sort_unstable_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        ordered
            .into_iter()
            .take(count)
            .map(|(_, _, key)| key.clone())
            .collect()
    }

    // == Length ==
    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.seqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_lru_new() {
        let lru = LruTracker::new();
        assert!(lru.is_empty());
        assert_eq!(lru.len(), 0);
    }

    #[test]
    fn test_victims_by_last_accessed() {
        let mut lru = LruTracker::new();
        let names = keys(&["a", "b", "c"]);
        for name in &names {
            lru.record_insert(name);
        }

        let access = [30, 10, 20];
        let victims = lru.victims(names.iter().zip(access), 2);
        assert_eq!(victims, keys(&["b", "c"]));
    }

    #[test]
    fn test_ties_broken_by_insertion_order() {
        let mut lru = LruTracker::new();
        let names = keys(&["first", "second", "third"]);
        for name in &names {
            lru.record_insert(name);
        }

        // All accessed in the same millisecond
        let victims = lru.victims(names.iter().rev().map(|k| (k, 100)), 3);
        assert_eq!(victims, keys(&["first", "second", "third"]));
    }

    #[test]
    fn test_reinsert_moves_to_back_of_ties() {
        let mut lru = LruTracker::new();
        let names = keys(&["a", "b"]);
        lru.record_insert("a");
        lru.record_insert("b");
        lru.record_insert("a");

        let victims = lru.victims(names.iter().map(|k| (k, 0)), 1);
        assert_eq!(victims, keys(&["b"]));
    }

    #[test]
    fn test_victims_zero_or_more_than_available() {
        let mut lru = LruTracker::new();
        let names = keys(&["a"]);
        lru.record_insert("a");

        assert!(lru.victims(names.iter().map(|k| (k, 0)), 0).is_empty());
        assert_eq!(lru.victims(names.iter().map(|k| (k, 0)), 5), names);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut lru = LruTracker::new();
        lru.record_insert("a");
        lru.record_insert("b");

        lru.remove("a");
        assert_eq!(lru.len(), 1);
        assert!(lru.seq("a").is_none());

        lru.remove("nonexistent");
        assert_eq!(lru.len(), 1);

        lru.clear();
        assert!(lru.is_empty());
    }
}
