//! Flash Cache - request cache for a flashcard learning backend
//!
//! Deduplicates in-flight fetches, coalesces near-simultaneous requests into
//! batches, expires entries by TTL, evicts by LRU under a memory ceiling and
//! persists entries across restarts.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;
pub mod upstream;

pub use api::AppState;
pub use cache::{CacheEvent, CacheHooks, CacheService, CacheStats};
pub use config::{CacheConfig, Config, StorageType};
pub use error::{CacheError, Result, StorageError};
pub use tasks::{spawn_cleanup_task, spawn_memory_monitor};
pub use upstream::UpstreamClient;
