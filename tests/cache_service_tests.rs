//! Integration Tests for the Cache Service
//!
//! Exercises the public `CacheService` API end to end: de-duplication,
//! expiry, eviction, batching, persistence and hooks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flash_cache::cache::{
    CacheServiceBuilder, FileStorage, KeyLock, MemoryStorage, StorageBackend,
};
use flash_cache::{CacheConfig, CacheError, CacheEvent, CacheHooks, CacheService, StorageError};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

// == Helper Functions ==

fn config() -> CacheConfig {
    CacheConfig {
        auto_cleanup: false,
        ..CacheConfig::default()
    }
}

fn batching_config(window: Duration) -> CacheConfig {
    CacheConfig {
        batching: true,
        batch_window: window,
        shared_resources: vec!["profile".to_string()],
        bulk_resources: vec!["cards".to_string()],
        ..config()
    }
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn counting_hook(count: &Arc<AtomicUsize>) -> impl Fn(&CacheEvent) + Send + Sync + 'static {
    let count = Arc::clone(count);
    move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    }
}

fn persistent(storage: Arc<dyn StorageBackend>) -> CacheServiceBuilder {
    CacheService::builder(CacheConfig {
        persist: true,
        ..config()
    })
    .storage(storage)
}

// == De-duplication ==

#[tokio::test]
async fn test_concurrent_get_or_set_fetches_once() {
    let cache = CacheService::new(config());
    let calls = counter();

    let requests = (0..20).map(|_| {
        let calls = Arc::clone(&calls);
        cache.get_or_set(
            "sets",
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, CacheError>(json!(["Spanish", "French"]))
            },
            None,
        )
    });

    let results: Vec<flash_cache::Result<Value>> = join_all(requests).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap(), json!(["Spanish", "French"]));
    }
    assert_eq!(cache.in_flight(), 0);
}

#[tokio::test]
async fn test_get_or_set_returns_cached_value_without_fetching() {
    let cache = CacheService::new(config());
    cache.set("sets|1", &"cached", None).await.unwrap();

    let value: String = cache
        .get_or_set(
            "sets|1",
            || async { Err::<String, _>(CacheError::Fetch("should not run".into())) },
            None,
        )
        .await
        .unwrap();

    assert_eq!(value, "cached");
    assert_eq!(cache.stats().await.hits, 1);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Card {
    front: String,
    back: String,
}

#[tokio::test]
async fn test_get_or_set_typed_value_round_trips() {
    let cache = CacheService::new(config());
    let card = Card {
        front: "hola".to_string(),
        back: "hello".to_string(),
    };

    let expected = card.clone();
    let fetched: Card = cache
        .get_or_set("cards|1", move || async move { Ok::<_, CacheError>(card) }, None)
        .await
        .unwrap();
    assert_eq!(fetched, expected);

    let cached: Option<Card> = cache.get("cards|1").await.unwrap();
    assert_eq!(cached, Some(expected));
}

#[tokio::test]
async fn test_fetch_error_reaches_every_waiter() {
    let cache = CacheService::new(config());
    let calls = counter();

    let requests = (0..5).map(|_| {
        let calls = Arc::clone(&calls);
        cache.get_or_set(
            "sets",
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Err::<Value, _>(CacheError::Fetch("upstream 500".into()))
            },
            None,
        )
    });

    for result in join_all(requests).await {
        assert_eq!(assert_err!(result), CacheError::Fetch("upstream 500".into()));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!cache.has("sets").await);
}

// == TTL ==

#[tokio::test]
async fn test_ttl_expiry_counts_miss() {
    let cache = CacheService::new(config());
    cache
        .set("k", &"v", Some(Duration::from_millis(100)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let value: Option<String> = cache.get("k").await.unwrap();
    assert_eq!(value.as_deref(), Some("v"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let value: Option<String> = cache.get("k").await.unwrap();
    assert_eq!(value, None);

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_lazy_expiry_removes_entry() {
    let expired = counter();
    let cache = CacheService::builder(config())
        .hooks(CacheHooks::new().on_expire(counting_hook(&expired)))
        .open()
        .await;

    cache
        .set("k", &1, Some(Duration::from_millis(20)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    // Still present until something reads it
    assert_eq!(cache.size().await, 1);
    assert_eq!(cache.get_value("k").await, None);
    assert_eq!(cache.size().await, 0);
    assert_eq!(cache.memory_usage().await, 0);
    assert_eq!(expired.load(Ordering::SeqCst), 1);
}

// == Invalidation ==

#[tokio::test]
async fn test_delete_by_prefix_leaves_other_keys() {
    let deleted = counter();
    let cache = CacheService::builder(config())
        .hooks(CacheHooks::new().on_delete(counting_hook(&deleted)))
        .open()
        .await;

    for key in ["sets|1", "sets|2", "cards|1", "setsx"] {
        cache.set(key, &key, None).await.unwrap();
    }

    assert_eq!(cache.delete_by_prefix("sets|").await, 2);
    assert!(!cache.has("sets|1").await);
    assert!(!cache.has("sets|2").await);
    assert!(cache.has("cards|1").await);
    assert!(cache.has("setsx").await);
    assert_eq!(deleted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_clear_is_idempotent_and_keeps_stats() {
    let cache = CacheService::new(config());
    cache.set("a", &1, None).await.unwrap();
    cache.set("b", &2, None).await.unwrap();
    cache.get_value("a").await;
    let before = cache.stats().await;

    cache.clear().await;
    cache.clear().await;

    assert_eq!(cache.size().await, 0);
    assert_eq!(cache.memory_usage().await, 0);
    assert_eq!(cache.stats().await, before);
}

// == Eviction ==

#[tokio::test]
async fn test_lru_eviction_under_byte_ceiling() {
    let evicted = counter();
    // Each value below serializes to 10 bytes; room for two
    let cache = CacheService::builder(CacheConfig {
        max_memory_bytes: 20,
        ..config()
    })
    .hooks(CacheHooks::new().on_evict(counting_hook(&evicted)))
    .open()
    .await;

    cache.set("a", &"aaaaaaaa", None).await.unwrap();
    cache.set("b", &"bbbbbbbb", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(cache.get_value("a").await.is_some());

    cache.set("c", &"cccccccc", None).await.unwrap();

    assert!(cache.has("a").await);
    assert!(!cache.has("b").await);
    assert!(cache.has("c").await);
    assert!(cache.memory_usage().await <= 20);
    assert_eq!(cache.stats().await.evictions, 1);
    assert_eq!(evicted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_max_size_is_enforced() {
    let cache = CacheService::new(CacheConfig {
        max_size: 3,
        ..config()
    });

    for i in 0..10 {
        cache.set(&format!("cards|{}", i), &i, None).await.unwrap();
    }

    assert_eq!(cache.size().await, 3);
    assert!(cache.has("cards|9").await);
    assert_eq!(cache.stats().await.evictions, 7);
}

// == Stats ==

#[tokio::test]
async fn test_hit_rate() {
    let cache = CacheService::new(config());
    assert_eq!(cache.hit_rate().await, 0.0);

    cache.set("k", &1, None).await.unwrap();
    for _ in 0..3 {
        cache.get_value("k").await;
    }
    cache.get_value("missing").await;

    assert!((cache.hit_rate().await - 0.75).abs() < f64::EPSILON);
}

// == Batching ==

#[tokio::test]
async fn test_batch_coalesces_keys_with_same_batch_key() {
    let cache = CacheService::new(batching_config(Duration::from_millis(50)));
    let calls = counter();

    let requests = ["profile|v=1", "profile|v=2"].map(|key| {
        let calls = Arc::clone(&calls);
        cache.get_or_set(
            key,
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CacheError>(json!({ "name": "Ana" }))
            },
            None,
        )
    });

    let results: Vec<flash_cache::Result<Value>> = join_all(requests).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(assert_ok!(result), json!({ "name": "Ana" }));
    }
    assert!(cache.has("profile|v=1").await);
    assert!(cache.has("profile|v=2").await);
}

#[tokio::test]
async fn test_batching_keeps_distinct_pages_apart() {
    let cache = CacheService::new(batching_config(Duration::from_millis(50)));
    let calls = counter();

    let requests = ["sets|page=1", "sets|page=2"].map(|key| {
        let calls = Arc::clone(&calls);
        let data = format!("{} data", key);
        cache.get_or_set(
            key,
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CacheError>(data)
            },
            None,
        )
    });

    let results: Vec<flash_cache::Result<String>> = join_all(requests).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(assert_ok!(results[0].clone()), "sets|page=1 data");
    assert_eq!(assert_ok!(results[1].clone()), "sets|page=2 data");
    assert_eq!(
        cache.get_value("sets|page=2").await,
        Some(json!("sets|page=2 data"))
    );
    assert_eq!(cache.pending_batches(), 0);
}

#[tokio::test]
async fn test_bulk_batch_merges_results() {
    let cache = CacheService::new(batching_config(Duration::from_millis(50)));

    let requests = [("cards|1", json!({"1": "hola"})), ("cards|2", json!({"2": "adios"}))].map(
        |(key, value)| {
            cache.get_or_set(
                key,
                move || async move { Ok::<_, CacheError>(value) },
                None,
            )
        },
    );

    let results: Vec<flash_cache::Result<Value>> = join_all(requests).await;

    let merged = json!({"1": "hola", "2": "adios"});
    for result in results {
        assert_eq!(assert_ok!(result), merged);
    }
}

#[tokio::test]
async fn test_clear_cancels_pending_batches() {
    let cache = CacheService::new(batching_config(Duration::from_secs(1)));

    let waiting = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_or_set(
                    "profile|v=1",
                    || async { Ok::<_, CacheError>(json!("never stored")) },
                    None,
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cache.pending_batches(), 1);

    cache.clear().await;

    let result: flash_cache::Result<Value> = waiting.await.unwrap();
    assert!(matches!(result, Err(CacheError::BatchCancelled(_))));
    assert_eq!(cache.pending_batches(), 0);
    assert_eq!(cache.size().await, 0);
}

// == Lock Manager ==

#[tokio::test]
async fn test_leaked_lock_expires() {
    let locks = KeyLock::new(Duration::from_millis(50));

    let guard = locks.acquire("sets").await;
    std::mem::forget(guard);

    let reacquired = tokio::time::timeout(Duration::from_secs(1), locks.acquire("sets")).await;
    assert!(reacquired.is_ok(), "lock should self-expire");
}

// == Persistence ==

#[tokio::test]
async fn test_file_persistence_round_trip_skips_expired() {
    let dir = TempDir::new().unwrap();
    let storage: Arc<dyn StorageBackend> = Arc::new(FileStorage::new(dir.path()));

    let first = persistent(Arc::clone(&storage)).open().await;
    first
        .set("sets|1", &json!({"name": "Verbs"}), Some(Duration::from_secs(60)))
        .await
        .unwrap();
    first
        .set("short", &1, Some(Duration::from_millis(30)))
        .await
        .unwrap();
    assert_ok!(first.flush().await);
    assert!(dir.path().join("flash-cache.json").exists());

    tokio::time::sleep(Duration::from_millis(60)).await;

    let second = persistent(storage).open().await;
    assert_eq!(second.size().await, 1);
    assert_eq!(second.get_value("sets|1").await, Some(json!({"name": "Verbs"})));
    assert!(!second.has("short").await);
}

#[tokio::test]
async fn test_memory_storage_restores_into_new_instance() {
    let storage = Arc::new(MemoryStorage::new());

    let first = persistent(storage.clone()).open().await;
    first.set("cards|1", &"front", None).await.unwrap();
    first.flush().await.unwrap();
    assert_eq!(storage.saved_len(), 1);

    let second = persistent(storage).open().await;
    assert!(second.has("cards|1").await);
}

#[tokio::test]
async fn test_restore_respects_tighter_budget() {
    let storage = Arc::new(MemoryStorage::new());

    let first = persistent(storage.clone()).open().await;
    for i in 0..20 {
        first.set(&format!("cards|{}", i), &"front-back", None).await.unwrap();
    }
    first.flush().await.unwrap();
    assert_eq!(storage.saved_len(), 20);

    let evicted = counter();
    let second = CacheService::builder(CacheConfig {
        persist: true,
        max_size: 5,
        max_memory_bytes: 50,
        ..config()
    })
    .storage(storage)
    .hooks(CacheHooks::new().on_evict(counting_hook(&evicted)))
    .open()
    .await;

    assert!(second.size().await <= 5);
    assert!(second.memory_usage().await <= 50);
    assert!(second.size().await > 0);
    assert_eq!(evicted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_quota_failure_does_not_fail_set() {
    let dir = TempDir::new().unwrap();
    let errors = counter();
    let storage = Arc::new(FileStorage::new(dir.path()).with_quota(Some(16)));

    let cache = persistent(storage)
        .hooks(CacheHooks::new().on_error(counting_hook(&errors)))
        .open()
        .await;

    assert_ok!(cache.set("sets|1", &"a value too large for the quota", None).await);
    assert!(cache.has("sets|1").await);

    let err = assert_err!(cache.flush().await);
    assert!(matches!(
        err,
        CacheError::Storage(StorageError::QuotaExceeded { .. })
    ));
    assert!(errors.load(Ordering::SeqCst) >= 1);
    assert!(!dir.path().join("flash-cache.json").exists());
}

#[tokio::test]
async fn test_corrupt_snapshot_starts_empty() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("flash-cache.json"), b"{not json").unwrap();
    let errors = counter();

    let cache = persistent(Arc::new(FileStorage::new(dir.path())))
        .hooks(CacheHooks::new().on_error(counting_hook(&errors)))
        .open()
        .await;

    assert_eq!(cache.size().await, 0);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

// == Hooks ==

#[tokio::test]
async fn test_panicking_hook_is_isolated() {
    let cache = CacheService::builder(config())
        .hooks(CacheHooks::new().on_set(|_| panic!("hook failure")))
        .open()
        .await;

    assert_ok!(cache.set("k", &"v", None).await);
    assert_eq!(cache.get_value("k").await, Some(json!("v")));
}

#[tokio::test]
async fn test_set_hook_receives_key_and_size() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let cache = CacheService::builder(config())
        .hooks(CacheHooks::new().on_set(move |event| {
            if let CacheEvent::Set { key, size } = event {
                sink.lock().unwrap().push((key.clone(), *size));
            }
        }))
        .open()
        .await;

    cache.set("sets|1", &"abc", None).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.as_slice(), &[("sets|1".to_string(), 5)]);
}
