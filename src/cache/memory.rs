//! Memory Cache Module
//!
//! Process-local cache backend: a HashMap of entries behind one lock.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::cache::{Cache, CacheEntry, CacheStats};
use crate::error::Result;

// == Memory Cache ==
/// In-memory cache backend with lazy TTL expiry.
///
/// Each operation holds the instance lock for its whole duration, so
/// check-then-remove sequences are atomic with respect to other calls on the
/// same instance.
#[derive(Debug)]
pub struct MemoryCache {
    inner: Mutex<MemoryInner>,
    default_ttl: Option<Duration>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

impl MemoryCache {
    // == Constructor ==
    /// Creates an empty cache.
    ///
    /// # Arguments
    /// * `default_ttl` - TTL applied when `set` gets none (None = never expires)
    pub fn new(default_ttl: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            default_ttl,
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Cache for MemoryCache {
    // == Get ==
    fn get(&self, key: &str) -> Option<Value> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        match inner.entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                inner.stats.record_hit();
                Some(entry.value.clone())
            }
            Some(_) => {
                inner.entries.remove(key);
                inner.stats.record_expirations(1);
                inner.stats.record_miss();
                debug!(key, "Memory cache entry expired on read");
                None
            }
            None => {
                inner.stats.record_miss();
                None
            }
        }
    }

    // == Set ==
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let entry = CacheEntry::new(value, ttl.or(self.default_ttl));
        self.inner.lock().entries.insert(key.to_string(), entry);
        Ok(())
    }

    // == Delete ==
    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.inner.lock().entries.remove(key).is_some())
    }

    fn clear(&self) -> Result<()> {
        self.inner.lock().entries.clear();
        Ok(())
    }

    // == Cleanup Expired ==
    fn cleanup(&self) -> Result<usize> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired());
        let removed = before - inner.entries.len();

        inner.stats.record_expirations(removed);
        Ok(removed)
    }

    fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
        let mut guard = self.inner.lock();
        let before = guard.entries.len();
        guard.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - guard.entries.len())
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn stats(&self) -> CacheStats {
        let guard = self.inner.lock();
        guard.stats.with_total_entries(guard.entries.len())
    }

    fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }
}
