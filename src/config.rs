//! Configuration Module
//!
//! Handles loading the process and cache configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

// == Storage Type ==
/// Which persistence backend the cache writes snapshots to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageType {
    /// Snapshot kept in process memory only
    #[default]
    Memory,
    /// JSON snapshot file on disk
    File,
}

impl StorageType {
    /// Parses `memory` / `file` (case-insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" => Some(StorageType::Memory),
            "file" => Some(StorageType::File),
            _ => None,
        }
    }
}

// == Cache Config ==
/// Options recognized by [`crate::cache::CacheService`] at construction.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Default entry lifetime
    pub ttl: Duration,
    /// Soft entry-count ceiling
    pub max_size: usize,
    /// Enables the periodic TTL sweep
    pub auto_cleanup: bool,
    /// Sweep period
    pub cleanup_interval: Duration,
    /// Keys inspected per sweep chunk before yielding
    pub sweep_batch_size: usize,
    /// Per-operation debug logging
    pub logging: bool,
    /// Routes eligible misses through the batch manager
    pub batching: bool,
    /// Coalescing window
    pub batch_window: Duration,
    /// Queue length that executes a batch without waiting for the window
    pub max_batch_size: usize,
    /// Batches older than this are force-cleared
    pub max_batch_age: Duration,
    /// Self-expiry of the per-key advisory lock
    pub lock_timeout: Duration,
    /// Enables snapshot persistence
    pub persist: bool,
    /// Persistence backend
    pub storage_type: StorageType,
    /// Directory for file storage
    pub storage_dir: PathBuf,
    /// Largest snapshot file storage accepts
    pub storage_quota_bytes: Option<usize>,
    /// Hard ceiling on estimated entry bytes, enforced by LRU eviction
    pub max_memory_bytes: usize,
    /// Memory monitor period
    pub memory_check_interval: Duration,
    /// Process memory budget the memory probe compares against
    pub memory_limit_bytes: Option<u64>,
    /// Resources whose keys all read the same data, so one fetch serves the batch
    pub shared_resources: Vec<String>,
    /// Resources whose batches merge every waiter's result
    pub bulk_resources: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            max_size: 1000,
            auto_cleanup: true,
            cleanup_interval: Duration::from_secs(60),
            sweep_batch_size: 100,
            logging: false,
            batching: false,
            batch_window: Duration::from_millis(50),
            max_batch_size: 10,
            max_batch_age: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(5),
            persist: false,
            storage_type: StorageType::Memory,
            storage_dir: PathBuf::from("./data"),
            storage_quota_bytes: Some(5 * 1024 * 1024),
            max_memory_bytes: 50 * 1024 * 1024,
            memory_check_interval: Duration::from_secs(30),
            memory_limit_bytes: None,
            shared_resources: Vec::new(),
            bulk_resources: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// Loads cache options from `CACHE_*` environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_TTL_MS` - Default entry lifetime (default: 300000)
    /// - `CACHE_MAX_SIZE` - Soft entry-count ceiling (default: 1000)
    /// - `CACHE_AUTO_CLEANUP` - Enable TTL sweep (default: true)
    /// - `CACHE_CLEANUP_INTERVAL_MS` - Sweep period (default: 60000)
    /// - `CACHE_LOGGING` - Per-operation debug logging (default: false)
    /// - `CACHE_BATCHING` - Enable request batching (default: false)
    /// - `CACHE_BATCH_WINDOW_MS` - Coalescing window (default: 50)
    /// - `CACHE_MAX_BATCH_SIZE` - Eager-execute threshold (default: 10)
    /// - `CACHE_PERSIST` - Enable persistence (default: false)
    /// - `CACHE_STORAGE_TYPE` - `memory` or `file` (default: memory)
    /// - `CACHE_STORAGE_DIR` - Directory for file storage (default: ./data)
    /// - `CACHE_MAX_MEMORY_BYTES` - LRU byte ceiling (default: 50 MiB)
    /// - `CACHE_MEMORY_LIMIT_BYTES` - Process memory budget (default: unset)
    /// - `CACHE_SHARED_RESOURCES` - Comma separated shared resources (default: empty)
    /// - `CACHE_BULK_RESOURCES` - Comma separated bulk resources (default: empty)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ttl: env_millis("CACHE_TTL_MS").unwrap_or(defaults.ttl),
            max_size: env_parse("CACHE_MAX_SIZE").unwrap_or(defaults.max_size),
            auto_cleanup: env_bool("CACHE_AUTO_CLEANUP").unwrap_or(defaults.auto_cleanup),
            cleanup_interval: env_millis("CACHE_CLEANUP_INTERVAL_MS")
                .unwrap_or(defaults.cleanup_interval),
            logging: env_bool("CACHE_LOGGING").unwrap_or(defaults.logging),
            batching: env_bool("CACHE_BATCHING").unwrap_or(defaults.batching),
            batch_window: env_millis("CACHE_BATCH_WINDOW_MS").unwrap_or(defaults.batch_window),
            max_batch_size: env_parse("CACHE_MAX_BATCH_SIZE").unwrap_or(defaults.max_batch_size),
            persist: env_bool("CACHE_PERSIST").unwrap_or(defaults.persist),
            storage_type: env::var("CACHE_STORAGE_TYPE")
                .ok()
                .and_then(|v| StorageType::parse(&v))
                .unwrap_or(defaults.storage_type),
            storage_dir: env::var("CACHE_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            max_memory_bytes: env_parse("CACHE_MAX_MEMORY_BYTES")
                .unwrap_or(defaults.max_memory_bytes),
            memory_limit_bytes: env_parse("CACHE_MEMORY_LIMIT_BYTES"),
            shared_resources: env_list("CACHE_SHARED_RESOURCES"),
            bulk_resources: env_list("CACHE_BULK_RESOURCES"),
            ..defaults
        }
    }
}

// == Server Config ==
/// Process configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Base URL of the flashcard REST backend; proxying is disabled when unset
    pub upstream_url: Option<String>,
    /// Cache options
    pub cache: CacheConfig,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `UPSTREAM_URL` - Flashcard backend base URL (default: unset)
    /// - `CACHE_*` - see [`CacheConfig::from_env`]
    pub fn from_env() -> Self {
        Self {
            server_port: env_parse("SERVER_PORT").unwrap_or(3000),
            upstream_url: env::var("UPSTREAM_URL").ok().filter(|v| !v.is_empty()),
            cache: CacheConfig::from_env(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            upstream_url: None,
            cache: CacheConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Zero is rejected: every millisecond setting is a period or a lifetime.
fn env_millis(name: &str) -> Option<Duration> {
    env_parse::<u64>(name)
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

fn env_list(name: &str) -> Vec<String> {
    env::var(name)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 3000);
        assert!(config.upstream_url.is_none());
        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        assert_eq!(config.cache.batch_window, Duration::from_millis(50));
        assert_eq!(config.cache.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.cache.storage_type, StorageType::Memory);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("SERVER_PORT");
        env::remove_var("UPSTREAM_URL");
        env::remove_var("CACHE_TTL_MS");
        env::remove_var("CACHE_MAX_SIZE");

        let config = Config::from_env();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        assert_eq!(config.cache.max_size, 1000);
    }

    #[test]
    fn test_zero_cleanup_interval_falls_back_to_default() {
        env::set_var("CACHE_CLEANUP_INTERVAL_MS", "0");
        let config = CacheConfig::from_env();
        env::remove_var("CACHE_CLEANUP_INTERVAL_MS");

        assert_eq!(config.cleanup_interval, CacheConfig::default().cleanup_interval);
    }

    #[test]
    fn test_env_millis_values() {
        env::set_var("FLASH_CACHE_TEST_MILLIS", "250");
        assert_eq!(env_millis("FLASH_CACHE_TEST_MILLIS"), Some(Duration::from_millis(250)));
        env::set_var("FLASH_CACHE_TEST_MILLIS", "0");
        assert_eq!(env_millis("FLASH_CACHE_TEST_MILLIS"), None);
        env::set_var("FLASH_CACHE_TEST_MILLIS", "-5");
        assert_eq!(env_millis("FLASH_CACHE_TEST_MILLIS"), None);
        env::remove_var("FLASH_CACHE_TEST_MILLIS");
    }

    #[test]
    fn test_env_list_values() {
        env::set_var("FLASH_CACHE_TEST_LIST", " profile, ,decks ");
        assert_eq!(env_list("FLASH_CACHE_TEST_LIST"), vec!["profile", "decks"]);
        env::remove_var("FLASH_CACHE_TEST_LIST");
        assert!(env_list("FLASH_CACHE_TEST_LIST").is_empty());
    }

    #[test]
    fn test_storage_type_parse() {
        assert_eq!(StorageType::parse("FILE"), Some(StorageType::File));
        assert_eq!(StorageType::parse(" memory "), Some(StorageType::Memory));
        assert_eq!(StorageType::parse("indexeddb"), None);
    }

    #[test]
    fn test_env_bool_values() {
        env::set_var("FLASH_CACHE_TEST_BOOL", "yes");
        assert_eq!(env_bool("FLASH_CACHE_TEST_BOOL"), Some(true));
        env::set_var("FLASH_CACHE_TEST_BOOL", "off");
        assert_eq!(env_bool("FLASH_CACHE_TEST_BOOL"), Some(false));
        env::set_var("FLASH_CACHE_TEST_BOOL", "maybe");
        assert_eq!(env_bool("FLASH_CACHE_TEST_BOOL"), None);
        env::remove_var("FLASH_CACHE_TEST_BOOL");
    }
}
