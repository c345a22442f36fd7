//! Cache Service Module
//!
//! The public facade: composes the entry table, lock manager, batch manager,
//! storage backend and event hooks behind `get` / `set` / `get_or_set`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error, info, warn};

use crate::cache::entry::current_timestamp_ms;
use crate::cache::memory::{MemoryProbe, PRESSURE_EVICT_FRACTION};
use crate::cache::{
    BatchManager, BatchPolicy, CacheEntry, CacheEvent, CacheHooks, CacheStats, DelimiterPolicy,
    EntryTable, FileStorage, IdentityPolicy, KeyLock, Lookup, MemoryStorage, StorageBackend,
};
use crate::config::{CacheConfig, StorageType};
use crate::error::{CacheError, Result, StorageError};

/// Save attempts per persistence round.
const PERSIST_ATTEMPTS: u32 = 3;

/// Linear backoff step between save attempts.
const PERSIST_BACKOFF: Duration = Duration::from_millis(100);

type PendingFetch = Shared<BoxFuture<'static, Result<Value>>>;

struct Inner {
    config: CacheConfig,
    table: RwLock<EntryTable>,
    locks: KeyLock,
    batches: BatchManager,
    policy: Arc<dyn BatchPolicy>,
    /// In-flight fetches by cache key, tagged with a fetch id
    pending: Mutex<HashMap<String, (u64, PendingFetch)>>,
    next_fetch_id: AtomicU64,
    /// Bumped by every invalidation; fetches started before one are not stored
    invalidations: AtomicU64,
    hooks: CacheHooks,
    storage: Option<Arc<dyn StorageBackend>>,
    persist_signal: Arc<Notify>,
    sweeping: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Wakes the persistence worker so it can observe shutdown
        self.persist_signal.notify_one();
    }
}

// == Cache Service ==
/// Request cache shared by every consumer of the application.
///
/// Cheap to clone; all clones share one entry table.
#[derive(Clone)]
pub struct CacheService {
    inner: Arc<Inner>,
}

// == Builder ==
/// Configures hooks, storage and batch policy before the cache opens.
pub struct CacheServiceBuilder {
    config: CacheConfig,
    hooks: CacheHooks,
    storage: Option<Arc<dyn StorageBackend>>,
    policy: Option<Arc<dyn BatchPolicy>>,
}

impl CacheServiceBuilder {
    pub fn hooks(mut self, hooks: CacheHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn batch_policy(mut self, policy: Arc<dyn BatchPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Builds the service, restoring the persisted snapshot when storage is set.
    ///
    /// A snapshot that fails to load is reported and the cache starts empty.
    /// Must run inside a Tokio runtime when storage is set.
    pub async fn open(self) -> CacheService {
        let service = self.assemble();
        if let Some(storage) = service.inner.storage.clone() {
            service.restore_from(storage.as_ref()).await;
            service.spawn_persist_worker();
        }
        service
    }

    fn assemble(self) -> CacheService {
        let config = self.config;
        let policy = self.policy.unwrap_or_else(|| default_policy(&config));

        CacheService {
            inner: Arc::new(Inner {
                table: RwLock::new(EntryTable::new()),
                locks: KeyLock::new(config.lock_timeout),
                batches: BatchManager::new(
                    config.batch_window,
                    config.max_batch_size,
                    config.max_batch_age,
                ),
                policy,
                pending: Mutex::new(HashMap::new()),
                next_fetch_id: AtomicU64::new(0),
                invalidations: AtomicU64::new(0),
                hooks: self.hooks,
                storage: self.storage,
                persist_signal: Arc::new(Notify::new()),
                sweeping: AtomicBool::new(false),
                config,
            }),
        }
    }
}

fn default_policy(config: &CacheConfig) -> Arc<dyn BatchPolicy> {
    if config.batching {
        Arc::new(
            DelimiterPolicy::default()
                .with_shared(config.shared_resources.iter().cloned())
                .with_bulk(config.bulk_resources.iter().cloned()),
        )
    } else {
        Arc::new(IdentityPolicy)
    }
}

impl CacheService {
    // == Constructors ==
    /// In-memory cache with no persistence and no hooks.
    pub fn new(config: CacheConfig) -> Self {
        Self::builder(config).assemble()
    }

    pub fn builder(config: CacheConfig) -> CacheServiceBuilder {
        CacheServiceBuilder {
            config,
            hooks: CacheHooks::default(),
            storage: None,
            policy: None,
        }
    }

    /// Opens a cache with the storage backend named by `config`.
    pub async fn from_config(config: CacheConfig, hooks: CacheHooks) -> Self {
        let mut builder = Self::builder(config.clone()).hooks(hooks);
        if config.persist {
            let storage: Arc<dyn StorageBackend> = match config.storage_type {
                StorageType::Memory => Arc::new(MemoryStorage::new()),
                StorageType::File => Arc::new(
                    FileStorage::new(&config.storage_dir).with_quota(config.storage_quota_bytes),
                ),
            };
            builder = builder.storage(storage);
        }
        builder.open().await
    }

    // == Get ==
    /// Returns the cached value if present and fresh.
    ///
    /// Fails only if the stored value does not deserialize into `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_value(key).await {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Untyped [`CacheService::get`].
    pub async fn get_value(&self, key: &str) -> Option<Value> {
        let now = current_timestamp_ms();
        let lookup = self.inner.table.write().await.lookup(key, now);

        match lookup {
            Lookup::Hit(value) => {
                self.log(|| debug!(key = %key, "Cache hit"));
                Some(value)
            }
            Lookup::Miss => {
                self.log(|| debug!(key = %key, "Cache miss"));
                None
            }
            Lookup::Expired(_) => {
                self.log(|| debug!(key = %key, "Cache miss (expired)"));
                self.inner.hooks.emit(CacheEvent::Expire {
                    key: key.to_string(),
                });
                self.schedule_persist();
                None
            }
        }
    }

    /// True if a fresh entry exists. Does not count as a hit or miss.
    pub async fn has(&self, key: &str) -> bool {
        let now = current_timestamp_ms();
        self.inner.table.read().await.contains_fresh(key, now)
    }

    // == Set ==
    /// Stores `data` under `key` for `ttl` (or the default TTL).
    ///
    /// Fails only if `data` cannot be serialized.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let value = serde_json::to_value(data)?;
        self.set_value(key, value, ttl).await;
        Ok(())
    }

    /// Untyped [`CacheService::set`].
    pub async fn set_value(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.inner.config.ttl);
        let entry = CacheEntry::new(value, ttl);
        let size = entry.size;
        let max_memory = self.inner.config.max_memory_bytes;

        if size > max_memory {
            // Can never fit; drop any older value rather than serve it
            let removed = self.inner.table.write().await.remove(key);
            warn!(key = %key, size, max_memory, "Value exceeds cache memory ceiling, not cached");
            self.inner.hooks.emit(CacheEvent::Error {
                error: CacheError::InvalidRequest(format!(
                    "value for '{}' is {} bytes, ceiling is {} bytes",
                    key, size, max_memory
                )),
            });
            if removed.is_some() {
                self.schedule_persist();
            }
            return;
        }

        let outcome = self.inner.table.write().await.insert(
            key.to_string(),
            entry,
            max_memory,
            self.inner.config.max_size,
        );

        if !outcome.evicted.is_empty() {
            info!(count = outcome.evicted.len(), "LRU eviction before insert");
        }
        for (evicted_key, evicted) in outcome.evicted {
            self.inner.hooks.emit(CacheEvent::Evict {
                key: evicted_key,
                size: evicted.size,
            });
        }

        self.log(|| debug!(key = %key, size, replaced = outcome.replaced, "Cache set"));
        self.inner.hooks.emit(CacheEvent::Set {
            key: key.to_string(),
            size,
        });
        self.schedule_persist();
    }

    // == Get Or Set ==
    /// Returns the cached value, or runs `fetcher` and caches its result.
    ///
    /// Concurrent calls for one key share a single fetch. With batching on, a
    /// key whose batch key differs from itself waits in the batch window.
    /// Fetch errors reach every waiting caller and are never cached.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        ttl: Option<Duration>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        E: Into<CacheError> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        if let Some(value) = self.get_value(key).await {
            return Ok(serde_json::from_value(value)?);
        }

        let fetch = {
            let _guard = self.inner.locks.acquire(key).await;

            // Another caller may have filled the key while we waited
            let now = current_timestamp_ms();
            if let Some(value) = self.inner.table.write().await.touch_fresh(key, now) {
                return Ok(serde_json::from_value(value)?);
            }

            self.join_or_start_fetch(key, fetcher, ttl)
        };

        let value = fetch.await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Returns the in-flight fetch for `key`, starting one if none exists.
    fn join_or_start_fetch<T, E, F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        ttl: Option<Duration>,
    ) -> PendingFetch
    where
        T: Serialize + Send + 'static,
        E: Into<CacheError> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let mut pending = self.pending();
        if let Some((_, fetch)) = pending.get(key) {
            self.log(|| debug!(key = %key, "Joining in-flight fetch"));
            return fetch.clone();
        }

        let fetch_id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let generation = self.inner.invalidations.load(Ordering::SeqCst);
        let raw: BoxFuture<'static, Result<Value>> = async move {
            let data = fetcher().await.map_err(Into::<CacheError>::into)?;
            Ok::<Value, CacheError>(serde_json::to_value(data)?)
        }
        .boxed();

        let batch_target = if self.inner.config.batching {
            Some(self.inner.policy.target(key)).filter(|target| target.key != key)
        } else {
            None
        };

        let service = self.clone();
        let owned_key = key.to_string();
        let task = tokio::spawn(async move {
            let result = match batch_target {
                Some(target) => {
                    service
                        .inner
                        .batches
                        .handle_batched_request(&owned_key, target, Box::new(move || raw))
                        .await
                }
                None => raw.await,
            };

            match &result {
                Ok(value) => {
                    if service.inner.invalidations.load(Ordering::SeqCst) == generation {
                        service.set_value(&owned_key, value.clone(), ttl).await;
                    } else {
                        debug!(key = %owned_key, "Cache invalidated during fetch, result not stored");
                    }
                }
                Err(e) => warn!(key = %owned_key, error = %e, "Fetch failed"),
            }

            let mut pending = service.pending();
            if pending.get(&owned_key).map(|(id, _)| *id) == Some(fetch_id) {
                pending.remove(&owned_key);
            }
            result
        });

        let fetch = task
            .map(|joined| {
                joined.unwrap_or_else(|e| Err(CacheError::Internal(format!("fetch task: {}", e))))
            })
            .boxed()
            .shared();

        pending.insert(key.to_string(), (fetch_id, fetch.clone()));
        fetch
    }

    // == Delete ==
    /// Removes the entry for `key`, if any.
    pub async fn delete(&self, key: &str) {
        self.inner.invalidations.fetch_add(1, Ordering::SeqCst);
        let removed = self.inner.table.write().await.remove(key);
        if removed.is_some() {
            self.log(|| debug!(key = %key, "Cache delete"));
            self.inner.hooks.emit(CacheEvent::Delete {
                key: key.to_string(),
            });
            self.schedule_persist();
        }
    }

    // == Delete By Prefix ==
    /// Removes every entry whose key starts with `prefix`; returns the count.
    pub async fn delete_by_prefix(&self, prefix: &str) -> usize {
        self.inner.invalidations.fetch_add(1, Ordering::SeqCst);
        let removed = self.inner.table.write().await.remove_prefix(prefix);
        let count = removed.len();

        if count > 0 {
            info!(prefix = %prefix, count, "Invalidated cache entries by prefix");
            for key in removed {
                self.inner.hooks.emit(CacheEvent::Delete { key });
            }
            self.schedule_persist();
        }
        count
    }

    // == Clear ==
    /// Empties the cache and cancels pending batches. Stats are kept.
    pub async fn clear(&self) {
        self.inner.invalidations.fetch_add(1, Ordering::SeqCst);
        let removed = self.inner.table.write().await.clear();
        let cancelled = self.inner.batches.clear_all_batches();

        if removed > 0 || cancelled > 0 {
            info!(removed, cancelled_batches = cancelled, "Cache cleared");
            self.schedule_persist();
        }
    }

    // == Sweep Expired ==
    /// Removes stale entries in chunks, yielding between chunks.
    ///
    /// Returns 0 without doing anything if a sweep is already running.
    pub async fn sweep_expired(&self) -> usize {
        if self.inner.sweeping.swap(true, Ordering::AcqRel) {
            debug!("TTL sweep already running, skipping tick");
            return 0;
        }
        let _reset = SweepFlag(&self.inner.sweeping);

        let keys = self.inner.table.read().await.keys();
        let chunk_size = self.inner.config.sweep_batch_size.max(1);
        let mut total = 0;

        for chunk in keys.chunks(chunk_size) {
            let now = current_timestamp_ms();
            let removed = self.inner.table.write().await.remove_expired(chunk, now);
            total += removed.len();
            for (key, _) in removed {
                self.inner.hooks.emit(CacheEvent::Expire { key });
            }
            tokio::task::yield_now().await;
        }

        if total > 0 {
            self.schedule_persist();
        }
        total
    }

    /// Force-clears batches that outlived their maximum age.
    pub fn clear_stale_batches(&self) -> usize {
        self.inner.batches.clear_stale_batches()
    }

    // == LRU Eviction ==
    /// Evicts the oldest-accessed `fraction` of entries (at least one).
    pub async fn evict_lru_fraction(&self, fraction: f64) -> usize {
        let evicted = {
            let mut table = self.inner.table.write().await;
            if table.is_empty() {
                return 0;
            }
            let count = ((table.len() as f64) * fraction).ceil().max(1.0) as usize;
            table.evict_lru(count)
        };

        let count = evicted.len();
        for (key, entry) in evicted {
            self.inner.hooks.emit(CacheEvent::Evict {
                key,
                size: entry.size,
            });
        }
        if count > 0 {
            self.schedule_persist();
        }
        count
    }

    /// Samples `probe` and evicts 10% of entries if memory is under pressure.
    ///
    /// Returns the number of evicted entries; 0 when the probe has no data.
    pub async fn relieve_memory_pressure(&self, probe: &dyn MemoryProbe) -> usize {
        let Some(sample) = probe.sample() else {
            return 0;
        };
        if !sample.under_pressure() {
            return 0;
        }

        warn!(
            used = sample.used,
            limit = sample.limit,
            "Memory pressure, evicting least recently used entries"
        );
        self.inner.hooks.emit(CacheEvent::MemoryPressure {
            used: sample.used,
            limit: sample.limit,
        });
        self.evict_lru_fraction(PRESSURE_EVICT_FRACTION).await
    }

    // == Stats ==
    pub async fn stats(&self) -> CacheStats {
        self.inner.table.read().await.stats()
    }

    /// Current entry count.
    pub async fn size(&self) -> usize {
        self.inner.table.read().await.len()
    }

    /// Current estimated bytes.
    pub async fn memory_usage(&self) -> usize {
        self.inner.table.read().await.memory_usage()
    }

    /// hits / (hits + misses), 0.0 before any access.
    pub async fn hit_rate(&self) -> f64 {
        self.stats().await.hit_rate()
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.pending().len()
    }

    pub fn pending_batches(&self) -> usize {
        self.inner.batches.pending_batches()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    // == Persistence ==
    /// Writes the current table to storage now and waits for the result.
    pub async fn flush(&self) -> Result<()> {
        self.persist_now().await.map_err(CacheError::from)
    }

    async fn restore_from(&self, storage: &dyn StorageBackend) {
        match storage.load().await {
            Ok(snapshot) => {
                let now = current_timestamp_ms();
                let total = snapshot.len();
                let config = &self.inner.config;
                let restored = self.inner.table.write().await.restore(
                    snapshot,
                    now,
                    config.max_memory_bytes,
                    config.max_size,
                );
                info!(backend = storage.name(), restored, "Restored persisted cache entries");
                if restored < total {
                    debug!(
                        backend = storage.name(),
                        dropped = total - restored,
                        "Skipped stale or over-budget persisted entries"
                    );
                }
            }
            Err(e) => {
                warn!(backend = storage.name(), error = %e, "Failed to load persisted cache, starting empty");
                self.inner.hooks.emit(CacheEvent::Error { error: e.into() });
            }
        }
    }

    fn schedule_persist(&self) {
        if self.inner.storage.is_some() {
            self.inner.persist_signal.notify_one();
        }
    }

    /// Saves with bounded retry. Failures are logged and reported, never raised
    /// into cache operations.
    async fn persist_now(&self) -> std::result::Result<(), StorageError> {
        let Some(storage) = self.inner.storage.as_ref() else {
            return Ok(());
        };
        let snapshot = self.inner.table.read().await.snapshot();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match storage.save(&snapshot).await {
                Ok(()) => {
                    self.log(|| debug!(entries = snapshot.len(), "Cache persisted"));
                    return Ok(());
                }
                Err(e) if attempt < PERSIST_ATTEMPTS
                    && !matches!(e, StorageError::QuotaExceeded { .. }) =>
                {
                    warn!(attempt, error = %e, "Cache persist failed, retrying");
                    tokio::time::sleep(PERSIST_BACKOFF * attempt).await;
                }
                Err(e) => {
                    error!(attempt, backend = storage.name(), error = %e, "Cache persist failed");
                    self.inner.hooks.emit(CacheEvent::Error {
                        error: e.clone().into(),
                    });
                    return Err(e);
                }
            }
        }
    }

    /// Coalesces persist signals into sequential saves of the latest table.
    fn spawn_persist_worker(&self) {
        let weak = Arc::downgrade(&self.inner);
        let signal = Arc::clone(&self.inner.persist_signal);

        tokio::spawn(async move {
            loop {
                signal.notified().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let service = CacheService { inner };
                let _ = service.persist_now().await;
            }
            debug!("Cache persistence worker stopped");
        });
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, (u64, PendingFetch)>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn log(&self, emit: impl FnOnce()) {
        if self.inner.config.logging {
            emit();
        }
    }
}

/// Clears the sweep flag when a sweep ends or is cancelled.
struct SweepFlag<'a>(&'a AtomicBool);

impl Drop for SweepFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
