//! Cache Events Module
//!
//! Optional fire-and-forget hooks for cache lifecycle events.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use crate::error::CacheError;

// == Cache Event ==
/// Something that happened inside the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// An entry was written
    Set { key: String, size: usize },
    /// An entry was explicitly removed
    Delete { key: String },
    /// A stale entry was removed (lazily or by the sweep)
    Expire { key: String },
    /// An entry was evicted by LRU policy
    Evict { key: String, size: usize },
    /// A cache-internal failure that was not propagated
    Error { error: CacheError },
    /// Process memory crossed the warning threshold
    MemoryPressure { used: u64, limit: u64 },
}

pub type Hook = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

// == Cache Hooks ==
/// Per-event callbacks. Every hook is optional.
///
/// A panicking hook is caught and logged; it never reaches the cache caller.
#[derive(Clone, Default)]
pub struct CacheHooks {
    pub on_set: Option<Hook>,
    pub on_delete: Option<Hook>,
    pub on_expire: Option<Hook>,
    pub on_evict: Option<Hook>,
    pub on_error: Option<Hook>,
    pub on_memory_pressure: Option<Hook>,
}

impl CacheHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_set(mut self, hook: impl Fn(&CacheEvent) + Send + Sync + 'static) -> Self {
        self.on_set = Some(Arc::new(hook));
        self
    }

    pub fn on_delete(mut self, hook: impl Fn(&CacheEvent) + Send + Sync + 'static) -> Self {
        self.on_delete = Some(Arc::new(hook));
        self
    }

    pub fn on_expire(mut self, hook: impl Fn(&CacheEvent) + Send + Sync + 'static) -> Self {
        self.on_expire = Some(Arc::new(hook));
        self
    }

    pub fn on_evict(mut self, hook: impl Fn(&CacheEvent) + Send + Sync + 'static) -> Self {
        self.on_evict = Some(Arc::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&CacheEvent) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub fn on_memory_pressure(
        mut self,
        hook: impl Fn(&CacheEvent) + Send + Sync + 'static,
    ) -> Self {
        self.on_memory_pressure = Some(Arc::new(hook));
        self
    }

    // == Emit ==
    /// Routes an event to its hook, if one is registered.
    pub fn emit(&self, event: CacheEvent) {
        let hook = match &event {
            CacheEvent::Set { .. } => &self.on_set,
            CacheEvent::Delete { .. } => &self.on_delete,
            CacheEvent::Expire { .. } => &self.on_expire,
            CacheEvent::Evict { .. } => &self.on_evict,
            CacheEvent::Error { .. } => &self.on_error,
            CacheEvent::MemoryPressure { .. } => &self.on_memory_pressure,
        };

        if let Some(hook) = hook {
            if catch_unwind(AssertUnwindSafe(|| hook(&event))).is_err() {
                error!(?event, "Cache event hook panicked");
            }
        }
    }
}

impl std::fmt::Debug for CacheHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHooks")
            .field("on_set", &self.on_set.is_some())
            .field("on_delete", &self.on_delete.is_some())
            .field("on_expire", &self.on_expire.is_some())
            .field("on_evict", &self.on_evict.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_memory_pressure", &self.on_memory_pressure.is_some())
            .finish()
    }
}
