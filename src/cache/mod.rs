//! Cache Module
//!
//! Request cache with in-flight de-duplication, batching, TTL expiration,
//! LRU eviction and snapshot persistence.

mod batch;
mod entry;
mod events;
mod lock;
mod lru;
pub mod memory;
mod service;
mod stats;
mod storage;
mod table;


// Re-export public types
pub use batch::{
    BatchKind, BatchManager, BatchPolicy, BatchTarget, DelimiterPolicy, Fetcher, IdentityPolicy,
};
pub use entry::{current_timestamp_ms, estimate_size, CacheEntry};
pub use events::{CacheEvent, CacheHooks, Hook};
pub use lock::{KeyLock, KeyLockGuard, DEFAULT_LOCK_TIMEOUT};
pub use lru::LruTracker;
pub use memory::{FixedMemoryProbe, MemoryProbe, MemorySample, ProcessMemoryProbe};
pub use service::{CacheService, CacheServiceBuilder};
pub use stats::CacheStats;
pub use storage::{FileStorage, MemoryStorage, Snapshot, StorageBackend, STORAGE_KEY};
pub use table::{EntryTable, InsertOutcome, Lookup};
