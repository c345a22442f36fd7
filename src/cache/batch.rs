//! Batch Manager Module
//!
//! Coalesces near-simultaneous misses that share a batch key into one
//! execution window.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};

/// Deferred fetch queued in a batch.
pub type Fetcher = Box<dyn FnOnce() -> BoxFuture<'static, Result<Value>> + Send>;

// == Batch Kind ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// Every waiter wants the same resource; the first fetcher's result is shared
    Single,
    /// Every waiter's fetcher runs and the results are merged into one object
    Bulk,
}

// == Batch Target ==
/// The group a cache key coalesces into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTarget {
    pub key: String,
    pub kind: BatchKind,
}

// == Batch Policy ==
/// Maps a cache key to its batch group.
pub trait BatchPolicy: Send + Sync {
    fn target(&self, cache_key: &str) -> BatchTarget;
}

/// Every key is its own group, so nothing is coalesced.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPolicy;

impl BatchPolicy for IdentityPolicy {
    fn target(&self, cache_key: &str) -> BatchTarget {
        BatchTarget {
            key: cache_key.to_string(),
            kind: BatchKind::Single,
        }
    }
}

/// Groups keys by the resource name before the first delimiter.
///
/// Only resources that were registered coalesce. A shared resource answers
/// every key with the same data, so `profile|v=1` and `profile|v=2` join one
/// [`BatchKind::Single`] group. A bulk resource produces a
/// [`BatchKind::Bulk`] group. Every other key keeps its own identity, so
/// `sets|page=1` and `sets|page=2` are never served from one fetch.
#[derive(Debug, Clone)]
pub struct DelimiterPolicy {
    delimiter: char,
    shared_resources: HashSet<String>,
    bulk_resources: HashSet<String>,
}

impl DelimiterPolicy {
    pub fn new(delimiter: char) -> Self {
        Self {
            delimiter,
            shared_resources: HashSet::new(),
            bulk_resources: HashSet::new(),
        }
    }

    pub fn with_shared<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared_resources
            .extend(resources.into_iter().map(Into::into));
        self
    }

    pub fn with_bulk<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bulk_resources
            .extend(resources.into_iter().map(Into::into));
        self
    }
}

impl Default for DelimiterPolicy {
    fn default() -> Self {
        Self::new('|')
    }
}

impl BatchPolicy for DelimiterPolicy {
    fn target(&self, cache_key: &str) -> BatchTarget {
        let resource = cache_key
            .split_once(self.delimiter)
            .map(|(resource, _)| resource)
            .unwrap_or(cache_key);

        let kind = if self.bulk_resources.contains(resource) {
            BatchKind::Bulk
        } else if self.shared_resources.contains(resource) {
            BatchKind::Single
        } else {
            return IdentityPolicy.target(cache_key);
        };

        BatchTarget {
            key: resource.to_string(),
            kind,
        }
    }
}

struct Waiter {
    cache_key: String,
    fetcher: Fetcher,
    tx: oneshot::Sender<Result<Value>>,
}

struct PendingBatch {
    id: u64,
    kind: BatchKind,
    created_at: Instant,
    waiters: Vec<Waiter>,
    timer: Option<JoinHandle<()>>,
}

impl PendingBatch {
    /// Rejects every waiter and stops the window timer.
    fn cancel(self, batch_key: &str) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        for waiter in self.waiters {
            let _ = waiter
                .tx
                .send(Err(CacheError::BatchCancelled(batch_key.to_string())));
        }
    }
}

struct BatchInner {
    groups: Mutex<HashMap<String, PendingBatch>>,
    window: Duration,
    max_batch_size: usize,
    max_age: Duration,
    next_id: AtomicU64,
}

// == Batch Manager ==
#[derive(Clone)]
pub struct BatchManager {
    inner: Arc<BatchInner>,
}

impl BatchManager {
    pub fn new(window: Duration, max_batch_size: usize, max_age: Duration) -> Self {
        Self {
            inner: Arc::new(BatchInner {
                groups: Mutex::new(HashMap::new()),
                window,
                max_batch_size: max_batch_size.max(1),
                max_age,
                next_id: AtomicU64::new(0),
            }),
        }
    }

    // == Handle Batched Request ==
    /// Queues `fetcher` in the group for `target` and waits for the group to run.
    ///
    /// A group runs when its window elapses, when it reaches `max_batch_size`,
    /// or, for bulk groups, as soon as the scheduler gets to it.
    pub async fn handle_batched_request(
        &self,
        cache_key: &str,
        target: BatchTarget,
        fetcher: Fetcher,
    ) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        let batch_key = target.key.clone();

        {
            let mut groups = self.groups();

            let stale = groups
                .get(&batch_key)
                .map(|g| g.created_at.elapsed() >= self.inner.max_age)
                .unwrap_or(false);
            if stale {
                if let Some(group) = groups.remove(&batch_key) {
                    warn!(batch_key = %batch_key, "Force-clearing stale batch");
                    group.cancel(&batch_key);
                }
            }

            if !groups.contains_key(&batch_key) {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let timer = self.spawn_trigger(&batch_key, id, target.kind);
                groups.insert(
                    batch_key.clone(),
                    PendingBatch {
                        id,
                        kind: target.kind,
                        created_at: Instant::now(),
                        waiters: Vec::new(),
                        timer: Some(timer),
                    },
                );
            }

            let full = match groups.get_mut(&batch_key) {
                Some(group) => {
                    group.waiters.push(Waiter {
                        cache_key: cache_key.to_string(),
                        fetcher,
                        tx,
                    });
                    group.waiters.len() >= self.inner.max_batch_size
                }
                None => false,
            };

            if full {
                if let Some(mut group) = groups.remove(&batch_key) {
                    if let Some(timer) = group.timer.take() {
                        timer.abort();
                    }
                    debug!(batch_key = %batch_key, size = group.waiters.len(), "Batch full, executing");
                    let key = batch_key.clone();
                    tokio::spawn(async move { run_batch(key, group).await });
                }
            }
        }

        rx.await.unwrap_or_else(|_| {
            Err(CacheError::BatchCancelled(format!(
                "{} dropped before completion",
                batch_key
            )))
        })
    }

    /// Spawns the task that runs a group when its window closes.
    fn spawn_trigger(&self, batch_key: &str, id: u64, kind: BatchKind) -> JoinHandle<()> {
        let manager = self.clone();
        let key = batch_key.to_string();
        let window = self.inner.window;

        tokio::spawn(async move {
            match kind {
                BatchKind::Single => tokio::time::sleep(window).await,
                // Let callers already scheduled on this tick join first
                BatchKind::Bulk => tokio::task::yield_now().await,
            }
            if let Some(group) = manager.take_group(&key, id) {
                run_batch(key, group).await;
            }
        })
    }

    /// Removes group `id` under `batch_key` if it is still pending.
    fn take_group(&self, batch_key: &str, id: u64) -> Option<PendingBatch> {
        let mut groups = self.groups();
        if groups.get(batch_key).map(|g| g.id) != Some(id) {
            return None;
        }
        // Running inside the timer task itself: detach, never abort
        groups.remove(batch_key).map(|mut group| {
            group.timer = None;
            group
        })
    }

    // == Clear ==
    /// Rejects every waiter of one group with `BatchCancelled`.
    pub fn clear_batch(&self, batch_key: &str) -> bool {
        let group = self.groups().remove(batch_key);
        match group {
            Some(group) => {
                group.cancel(batch_key);
                true
            }
            None => false,
        }
    }

    /// Rejects every pending waiter of every group.
    pub fn clear_all_batches(&self) -> usize {
        let drained: Vec<(String, PendingBatch)> = self.groups().drain().collect();
        let count = drained.len();
        for (key, group) in drained {
            group.cancel(&key);
        }
        count
    }

    /// Force-clears groups older than the configured maximum age.
    pub fn clear_stale_batches(&self) -> usize {
        let max_age = self.inner.max_age;
        let stale: Vec<(String, PendingBatch)> = {
            let mut groups = self.groups();
            let keys: Vec<String> = groups
                .iter()
                .filter(|(_, g)| g.created_at.elapsed() >= max_age)
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter()
                .filter_map(|k| groups.remove(&k).map(|g| (k, g)))
                .collect()
        };

        let count = stale.len();
        for (key, group) in stale {
            warn!(batch_key = %key, "Force-clearing stale batch");
            group.cancel(&key);
        }
        count
    }

    /// Number of groups waiting to run.
    pub fn pending_batches(&self) -> usize {
        self.groups().len()
    }

    fn groups(&self) -> MutexGuard<'_, HashMap<String, PendingBatch>> {
        self.inner
            .groups
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// == Run Batch ==
/// Executes a group and fans the outcome out to every waiter.
async fn run_batch(batch_key: String, group: PendingBatch) {
    let size = group.waiters.len();
    debug!(batch_key = %batch_key, size, kind = ?group.kind, "Executing batch");

    let mut senders = Vec::with_capacity(size);
    let mut fetchers = Vec::with_capacity(size);
    for waiter in group.waiters {
        senders.push(waiter.tx);
        fetchers.push((waiter.cache_key, waiter.fetcher));
    }

    let outcome = match group.kind {
        BatchKind::Single => match fetchers.into_iter().next() {
            Some((_, fetcher)) => fetcher().await,
            None => return,
        },
        BatchKind::Bulk => {
            let (keys, pending): (Vec<String>, Vec<_>) =
                fetchers.into_iter().map(|(key, f)| (key, f())).unzip();
            let results = join_all(pending).await;
            merge_bulk(keys, results)
        }
    };

    if let Err(e) = &outcome {
        warn!(batch_key = %batch_key, error = %e, "Batch fetch failed");
    }
    for tx in senders {
        let _ = tx.send(outcome.clone());
    }
}

/// Merges per-waiter results; the first error fails the whole batch.
fn merge_bulk(keys: Vec<String>, results: Vec<Result<Value>>) -> Result<Value> {
    let mut merged = Map::new();
    for (key, result) in keys.into_iter().zip(results) {
        match result? {
            Value::Object(map) => merged.extend(map),
            other => {
                merged.insert(key, other);
            }
        }
    }
    Ok(Value::Object(merged))
}
