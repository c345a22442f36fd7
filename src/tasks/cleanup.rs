//! TTL Cleanup Task
//!
//! Background task that periodically removes expired cache entries and
//! force-clears batches that outlived their maximum age.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::cache::CacheService;

/// Floor for tick periods; `interval` panics on zero.
const MIN_TICK: Duration = Duration::from_millis(1);

/// Spawns a background task that periodically sweeps expired cache entries.
///
/// The sweep walks the table in bounded chunks and yields between them.
/// Ticks that fire while a sweep is still running are skipped, not queued.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cache = CacheService::new(CacheConfig::default());
/// let cleanup_handle = spawn_cleanup_task(cache.clone(), Duration::from_secs(60));
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(cache: CacheService, cleanup_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting TTL cleanup task with interval of {} ms",
            cleanup_interval.as_millis()
        );

        let mut ticker = tokio::time::interval(cleanup_interval.max(MIN_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let removed = cache.sweep_expired().await;
            let stale_batches = cache.clear_stale_batches();

            if removed > 0 {
                info!("TTL cleanup: removed {} expired entries", removed);
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
            if stale_batches > 0 {
                info!("TTL cleanup: cleared {} stale batches", stale_batches);
            }
        }
    })
}
