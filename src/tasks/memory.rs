//! Memory Monitor Task
//!
//! Background task that evicts least recently used entries when the process
//! runs close to its memory limit.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::cache::{CacheService, MemoryProbe};

/// Floor for tick periods; `interval` panics on zero.
const MIN_TICK: Duration = Duration::from_millis(1);

/// Spawns the memory-pressure monitor.
///
/// Each tick samples `probe`; at 80% of the limit the oldest-accessed 10% of
/// entries are evicted. A probe with no data (unsupported platform, no limit
/// configured) makes every tick a no-op.
pub fn spawn_memory_monitor(
    cache: CacheService,
    probe: Arc<dyn MemoryProbe>,
    check_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if probe.sample().is_none() {
            info!("Memory usage unavailable, pressure eviction disabled");
        } else {
            info!(
                "Starting memory monitor with interval of {} ms",
                check_interval.as_millis()
            );
        }

        let mut ticker = tokio::time::interval(check_interval.max(MIN_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let evicted = cache.relieve_memory_pressure(probe.as_ref()).await;
            if evicted > 0 {
                info!("Memory monitor: evicted {} entries", evicted);
            } else {
                debug!("Memory monitor: no pressure");
            }
        }
    })
}
