//! Storage Backend Module
//!
//! Pluggable persistence for whole-table snapshots.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::CacheEntry;
use crate::error::StorageError;

/// Fixed identifier the snapshot is stored under.
pub const STORAGE_KEY: &str = "flash-cache";

/// Counter for generating unique temp file names.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub type Snapshot = HashMap<String, CacheEntry>;

// == Storage Backend ==
/// Loads and saves the entire entry table as one snapshot.
///
/// `load` returns only entries that are still fresh at load time.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn load(&self) -> Result<Snapshot, StorageError>;

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

fn drop_expired(snapshot: Snapshot) -> Snapshot {
    let now = current_timestamp_ms();
    snapshot
        .into_iter()
        .filter(|(_, entry)| !entry.is_expired_at(now))
        .collect()
}

// == Memory Storage ==
/// Keeps the last saved snapshot in process memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    snapshot: Mutex<Snapshot>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in the last saved snapshot, expired ones included.
    pub fn saved_len(&self) -> usize {
        self.snapshot.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn load(&self) -> Result<Snapshot, StorageError> {
        let snapshot = self
            .snapshot
            .lock()
            .map_err(|_| StorageError::Io("memory snapshot lock poisoned".to_string()))?
            .clone();
        Ok(drop_expired(snapshot))
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|_| StorageError::Io("memory snapshot lock poisoned".to_string()))?;
        *guard = snapshot.clone();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// == File Storage ==
/// Stores the snapshot as one JSON file in a directory.
///
/// Writes are atomic: data goes to a temp file in the same directory, then
/// is renamed over `flash-cache.json`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
    quota_bytes: Option<usize>,
}

impl FileStorage {
    /// Create a file backend writing into `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            quota_bytes: None,
        }
    }

    /// Reject snapshots larger than `quota_bytes`.
    pub fn with_quota(mut self, quota_bytes: Option<usize>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", STORAGE_KEY))
    }

    fn temp_file_path(&self) -> PathBuf {
        let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        self.dir
            .join(format!(".{}.tmp.{}.{}", STORAGE_KEY, pid, counter))
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn load(&self) -> Result<Snapshot, StorageError> {
        let bytes = match fs::read(self.path()).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::new()),
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        Ok(drop_expired(snapshot))
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let data = serde_json::to_vec(snapshot)?;
        if let Some(quota) = self.quota_bytes {
            if data.len() > quota {
                return Err(StorageError::QuotaExceeded {
                    size: data.len(),
                    quota,
                });
            }
        }

        fs::create_dir_all(&self.dir).await?;
        let temp_path = self.temp_file_path();
        fs::write(&temp_path, &data).await?;
        if let Err(e) = fs::rename(&temp_path, self.path()).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
