//! Entry Table Module
//!
//! In-memory mapping from cache key to entry, with LRU bookkeeping,
//! memory accounting and hit/miss statistics.

use std::collections::HashMap;

use serde_json::Value;

use crate::cache::{CacheEntry, CacheStats, LruTracker};

// == Lookup ==
/// Outcome of reading a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Fresh entry; its `last_accessed` has been bumped
    Hit(Value),
    /// No entry under this key
    Miss,
    /// Entry was stale and has been removed
    Expired(CacheEntry),
}

// == Insert Outcome ==
/// What an insert displaced.
#[derive(Debug, Default)]
pub struct InsertOutcome {
    /// Entries evicted to make room, in eviction order
    pub evicted: Vec<(String, CacheEntry)>,
    /// Whether an existing entry under the same key was replaced
    pub replaced: bool,
}

// == Entry Table ==
/// Owns every cache entry. Only cloned data leaves the table.
#[derive(Debug, Default)]
pub struct EntryTable {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// Insertion order for LRU tie-breaks
    lru: LruTracker,
    /// Performance statistics
    stats: CacheStats,
    /// Sum of `size` over all entries
    memory_usage: usize,
}

impl EntryTable {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Lookup ==
    /// Reads a key as of `now`, recording a hit or miss.
    ///
    /// Stale entries are treated as absent and removed on the spot.
    pub fn lookup(&mut self, key: &str, now: u64) -> Lookup {
        match self.entries.get_mut(key) {
            None => {
                self.stats.record_miss();
                return Lookup::Miss;
            }
            Some(entry) if !entry.is_expired_at(now) => {
                entry.touch(now);
                let data = entry.data.clone();
                self.stats.record_hit();
                return Lookup::Hit(data);
            }
            Some(_) => {}
        }

        self.stats.record_miss();
        match self.remove(key) {
            Some(entry) => Lookup::Expired(entry),
            None => Lookup::Miss,
        }
    }

    /// Returns a fresh entry's data and bumps its recency, without counting
    /// a hit or miss.
    pub fn touch_fresh(&mut self, key: &str, now: u64) -> Option<Value> {
        let entry = self.entries.get_mut(key)?;
        if entry.is_expired_at(now) {
            return None;
        }
        entry.touch(now);
        Some(entry.data.clone())
    }

    // == Contains Fresh ==
    /// True if a fresh entry exists. Leaves stats and recency untouched.
    pub fn contains_fresh(&self, key: &str, now: u64) -> bool {
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired_at(now))
            .unwrap_or(false)
    }

    // == Insert ==
    /// Stores an entry, evicting least-recently-used entries first until the
    /// new one fits under `max_memory_bytes` and the table holds fewer than
    /// `max_size` entries.
    pub fn insert(
        &mut self,
        key: String,
        entry: CacheEntry,
        max_memory_bytes: usize,
        max_size: usize,
    ) -> InsertOutcome {
        let replaced = self.remove(&key).is_some();

        let over_budget = |table: &Self| {
            table.memory_usage + entry.size > max_memory_bytes
                || table.entries.len() >= max_size.max(1)
        };

        let mut evicted = Vec::new();
        if over_budget(&*self) {
            let order = self.lru.victims(
                self.entries.iter().map(|(k, e)| (k, e.last_accessed)),
                self.entries.len(),
            );
            for victim in order {
                if !over_budget(&*self) {
                    break;
                }
                if let Some(old) = self.remove(&victim) {
                    self.stats.record_eviction();
                    evicted.push((victim, old));
                }
            }
        }

        self.memory_usage += entry.size;
        self.lru.record_insert(&key);
        self.entries.insert(key, entry);
        self.stats.record_set();

        InsertOutcome { evicted, replaced }
    }

    // == Remove ==
    /// Removes an entry by key and releases its memory.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(key);
        self.memory_usage = self.memory_usage.saturating_sub(entry.size);
        Some(entry)
    }

    // == Remove By Prefix ==
    /// Removes every key starting with `prefix`; returns the removed keys.
    pub fn remove_prefix(&mut self, prefix: &str) -> Vec<String> {
        let keys: Vec<String> = self
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();

        for key in &keys {
            self.remove(key);
        }
        keys
    }

    // == Remove Expired ==
    /// Removes the stale entries among `keys`.
    pub fn remove_expired(&mut self, keys: &[String], now: u64) -> Vec<(String, CacheEntry)> {
        let mut removed = Vec::new();
        for key in keys {
            let stale = self
                .entries
                .get(key)
                .map(|entry| entry.is_expired_at(now))
                .unwrap_or(false);
            if stale {
                if let Some(entry) = self.remove(key) {
                    removed.push((key.clone(), entry));
                }
            }
        }
        removed
    }

    // == Evict LRU ==
    /// Evicts up to `count` entries with the oldest `last_accessed`.
    pub fn evict_lru(&mut self, count: usize) -> Vec<(String, CacheEntry)> {
        let order = self.lru.victims(
            self.entries.iter().map(|(k, e)| (k, e.last_accessed)),
            count,
        );

        let mut evicted = Vec::with_capacity(order.len());
        for key in order {
            if let Some(entry) = self.remove(&key) {
                self.stats.record_eviction();
                evicted.push((key, entry));
            }
        }
        evicted
    }

    // == Clear ==
    /// Empties the table and resets memory accounting. Stats are kept.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.lru.clear();
        self.memory_usage = 0;
        count
    }

    // == Snapshot / Restore ==
    /// Clones every entry, for persistence.
    pub fn snapshot(&self) -> HashMap<String, CacheEntry> {
        self.entries.clone()
    }

    /// Loads persisted entries, skipping any already stale as of `now`.
    ///
    /// The most recently accessed entries are kept while they fit under
    /// `max_memory_bytes` and `max_size`; the rest are dropped.
    pub fn restore(
        &mut self,
        entries: HashMap<String, CacheEntry>,
        now: u64,
        max_memory_bytes: usize,
        max_size: usize,
    ) -> usize {
        self.clear();

        let mut fresh: Vec<(String, CacheEntry)> = entries
            .into_iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .collect();
        fresh.sort_by(|(_, a), (_, b)| b.last_accessed.cmp(&a.last_accessed));

        let mut budget = 0usize;
        let mut kept = Vec::with_capacity(fresh.len().min(max_size));
        for (key, entry) in fresh {
            if kept.len() >= max_size.max(1) {
                break;
            }
            if budget + entry.size > max_memory_bytes {
                continue;
            }
            budget += entry.size;
            kept.push((key, entry));
        }
        // Oldest first so insertion sequence follows original creation order
        kept.sort_by_key(|(_, entry)| entry.timestamp);

        let count = kept.len();
        for (key, entry) in kept {
            self.memory_usage += entry.size;
            self.lru.record_insert(&key);
            self.entries.insert(key, entry);
        }
        count
    }

    /// Current keys, for chunked sweeps.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    // == Accessors ==
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn memory_usage(&self) -> usize {
        self.memory_usage
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
