//! Cache Backend Trait
//!
//! The capability every backend implements, plus typed helpers layered on top.

use std::fmt::Debug;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::CacheStats;
use crate::error::Result;

// == Cache Trait ==
/// Key/value store with optional per-entry expiry.
///
/// Implementations guard their own state, so every method takes `&self` and
/// instances are shared behind `Arc<dyn Cache>`.
pub trait Cache: Send + Sync + Debug {
    /// Returns the value for `key`, or None if it was never set, was deleted
    /// or has expired. An expired entry is removed by this call.
    fn get(&self, key: &str) -> Option<Value>;

    /// Stores `value` under `key`, replacing any existing entry.
    ///
    /// A `ttl` of None falls back to [`Cache::default_ttl`].
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Removes `key`. Returns true if an entry existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Removes every entry owned by this instance.
    fn clear(&self) -> Result<()>;

    /// Eagerly removes expired entries and returns how many were removed.
    fn cleanup(&self) -> Result<usize>;

    /// Removes every entry whose key starts with `prefix`.
    fn invalidate_prefix(&self, prefix: &str) -> Result<usize>;

    /// Number of stored entries, including expired ones not yet evicted.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of hit/miss counters and current size.
    fn stats(&self) -> CacheStats;

    /// TTL applied when `set` is called without one.
    fn default_ttl(&self) -> Option<Duration>;
}

// == Typed Helpers ==
/// Serde-typed access and memoizing lookups for any [`Cache`].
pub trait CacheExt: Cache {
    /// Reads `key` and decodes it as `T`.
    ///
    /// A value that does not decode is reported as a miss.
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(key, error = %e, "Cached value has an unexpected shape");
                None
            }
        }
    }

    /// Encodes `value` and stores it under `key`.
    fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        self.set(key, serde_json::to_value(value)?, ttl)
    }

    // == Get Or Set ==
    /// Returns the cached value for `key`, computing and storing it on a miss.
    ///
    /// The factory runs only on a miss. Its error is returned unchanged and
    /// nothing is stored. Two callers racing on the same miss may both run
    /// the factory. A failure to store the computed value is logged and the
    /// value is still returned.
    fn get_or_set<T, E, F>(&self, key: &str, factory: F, ttl: Option<Duration>) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        if let Some(hit) = self.get_as::<T>(key) {
            debug!(key, "Cache hit");
            return Ok(hit);
        }

        debug!(key, "Cache miss, computing value");
        let value = factory()?;

        if let Err(e) = self.set_as(key, &value, ttl) {
            warn!(key, error = %e, "Failed to store computed value");
        }
        Ok(value)
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}
