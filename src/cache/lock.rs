//! Lock Manager Module
//!
//! Per-key advisory locks that self-expire after a fixed timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::warn;

/// Default self-expiry for a lock whose holder never releases it.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

type Holders = Arc<Mutex<HashMap<String, Holder>>>;

/// Registration of the current owner of a key.
///
/// Dropping it drops `release`, which wakes every waiter on `released`.
struct Holder {
    id: u64,
    deadline: Instant,
    release: watch::Sender<()>,
}

// == Key Lock ==
/// Cooperative per-key lock.
///
/// Only callers that go through [`KeyLock::acquire`] are serialized. A holder
/// that neither drops its guard nor calls [`KeyLock::release`] loses the lock
/// once `timeout` has passed, so a leaked guard cannot wedge a key forever.
#[derive(Clone)]
pub struct KeyLock {
    holders: Holders,
    timeout: Duration,
    next_id: Arc<AtomicU64>,
}

impl KeyLock {
    pub fn new(timeout: Duration) -> Self {
        Self {
            holders: Arc::new(Mutex::new(HashMap::new())),
            timeout,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    // == Acquire ==
    /// Waits until no live holder owns `key`, then takes it.
    pub async fn acquire(&self, key: &str) -> KeyLockGuard {
        loop {
            let (mut released, deadline, holder_id) = match self.try_register(key) {
                Ok(guard) => return guard,
                Err(wait) => wait,
            };

            tokio::select! {
                _ = released.changed() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    self.expire(key, holder_id);
                }
            }
        }
    }

    /// Registers a new holder, or returns what to wait on.
    fn try_register(
        &self,
        key: &str,
    ) -> Result<KeyLockGuard, (watch::Receiver<()>, Instant, u64)> {
        let mut holders = lock_holders(&self.holders);
        let now = Instant::now();

        if let Some(holder) = holders.get(key) {
            if holder.deadline > now {
                return Err((holder.release.subscribe(), holder.deadline, holder.id));
            }
            warn!(key = %key, "Advisory lock expired without release");
            holders.remove(key);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (release, _) = watch::channel(());
        holders.insert(
            key.to_string(),
            Holder {
                id,
                deadline: now + self.timeout,
                release,
            },
        );

        Ok(KeyLockGuard {
            key: key.to_string(),
            id,
            holders: Arc::clone(&self.holders),
        })
    }

    /// Drops the registration of `holder_id` if it is still current and past
    /// its deadline.
    fn expire(&self, key: &str, holder_id: u64) {
        let mut holders = lock_holders(&self.holders);
        let expired = holders
            .get(key)
            .map(|h| h.id == holder_id && h.deadline <= Instant::now())
            .unwrap_or(false);
        if expired {
            warn!(key = %key, "Advisory lock expired without release");
            holders.remove(key);
        }
    }

    // == Release ==
    /// Removes the registration for `key` immediately, whoever holds it.
    pub fn release(&self, key: &str) {
        lock_holders(&self.holders).remove(key);
    }

    /// True if `key` has a live (unexpired) holder.
    pub fn is_locked(&self, key: &str) -> bool {
        lock_holders(&self.holders)
            .get(key)
            .map(|h| h.deadline > Instant::now())
            .unwrap_or(false)
    }

    /// Number of registrations, expired ones included.
    pub fn len(&self) -> usize {
        lock_holders(&self.holders).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for KeyLock {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

// == Key Lock Guard ==
/// Ownership of one key. Dropping it releases the key.
pub struct KeyLockGuard {
    key: String,
    id: u64,
    holders: Holders,
}

impl KeyLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        let mut holders = lock_holders(&self.holders);
        // A newer holder may own the key if this one expired
        if holders.get(&self.key).map(|h| h.id) == Some(self.id) {
            holders.remove(&self.key);
        }
    }
}

fn lock_holders(holders: &Mutex<HashMap<String, Holder>>) -> MutexGuard<'_, HashMap<String, Holder>> {
    holders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
