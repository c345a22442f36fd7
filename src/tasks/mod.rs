//! Background Tasks Module
//!
//! Contains background tasks that run periodically while the cache is alive.
//!
//! # Tasks
//! - TTL Cleanup: Removes expired entries and stale batches at configured intervals
//! - Memory Monitor: Evicts LRU entries when process memory nears its limit

mod cleanup;
mod memory;

pub use cleanup::spawn_cleanup_task;
pub use memory::spawn_memory_monitor;
