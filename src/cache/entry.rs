//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL and access tracking.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

// == Cache Entry ==
/// Represents a single cache entry with its data and metadata.
///
/// Serialized in camelCase, which is also the persisted snapshot layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T = Value> {
    /// The cached value
    pub data: T,
    /// Creation timestamp (Unix milliseconds)
    pub timestamp: u64,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at: u64,
    /// Last successful read (Unix milliseconds)
    pub last_accessed: u64,
    /// Estimated size in bytes (serialized JSON length)
    pub size: usize,
}

impl CacheEntry<Value> {
    // == Constructor ==
    /// Creates a new entry that expires `ttl` after now.
    pub fn new(data: Value, ttl: Duration) -> Self {
        Self::at(data, ttl, current_timestamp_ms())
    }

    /// Creates a new entry as of `now`.
    pub fn at(data: Value, ttl: Duration, now: u64) -> Self {
        let size = estimate_size(&data);
        Self {
            data,
            timestamp: now,
            expires_at: now.saturating_add(ttl.as_millis() as u64),
            last_accessed: now,
            size,
        }
    }
}

impl<T> CacheEntry<T> {
    // == Is Expired ==
    /// Checks expiry against a given instant.
    ///
    /// Stale strictly after `expires_at`: an entry read at exactly its expiry
    /// instant is still served.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now > self.expires_at
    }

    // == Touch ==
    /// Records a successful read.
    pub fn touch(&mut self, now: u64) {
        self.last_accessed = self.last_accessed.max(now);
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Estimates the memory footprint of a value as its serialized JSON length.
pub fn estimate_size(data: &Value) -> usize {
    serde_json::to_vec(data).map(|bytes| bytes.len()).unwrap_or(0)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread::sleep;

    #[test]
    fn test_entry_creation() {
        let entry = CacheEntry::new(json!({"id": 1}), Duration::from_secs(60));

        assert_eq!(entry.data, json!({"id": 1}));
        assert_eq!(entry.expires_at, entry.timestamp + 60_000);
        assert_eq!(entry.last_accessed, entry.timestamp);
        assert_eq!(entry.size, r#"{"id":1}"#.len());
        assert!(!entry.is_expired_at(current_timestamp_ms()));
    }

    #[test]
    fn test_entry_expiration() {
        let entry = CacheEntry::new(json!("v"), Duration::from_millis(20));

        assert!(!entry.is_expired_at(current_timestamp_ms()));
        sleep(Duration::from_millis(40));
        assert!(entry.is_expired_at(current_timestamp_ms()));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let entry = CacheEntry::at(json!("v"), Duration::from_millis(100), 1_000);

        assert!(!entry.is_expired_at(1_100), "Still fresh at expires_at");
        assert!(entry.is_expired_at(1_101), "Stale once now > expires_at");
    }

    #[test]
    fn test_touch_never_goes_backwards() {
        let mut entry = CacheEntry::at(json!("v"), Duration::from_secs(1), 5_000);

        entry.touch(6_000);
        assert_eq!(entry.last_accessed, 6_000);

        entry.touch(4_000);
        assert_eq!(entry.last_accessed, 6_000);
        assert!(entry.last_accessed >= entry.timestamp);
    }

    #[test]
    fn test_serialized_layout_is_camel_case() {
        let entry = CacheEntry::at(json!([1, 2]), Duration::from_millis(10), 1);
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["expiresAt"], 11);
        assert_eq!(json["lastAccessed"], 1);
        assert_eq!(json["size"], 5);
    }
}
