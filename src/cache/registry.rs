//! Cache Registry Module
//!
//! Named cache instances shared across the application.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{Cache, CacheExt, CacheStats, FileCache, Memoized, MemoryCache, FILE_CACHE, MEMORY_CACHE};
use crate::config::Config;
use crate::error::{CacheError, Result};

static SHARED: OnceCell<Arc<CacheRegistry>> = OnceCell::new();

// == Cache Registry ==
/// Maps cache names to backends and tracks which one is the default.
///
/// Names are write-once: registering a taken name fails instead of
/// replacing the existing cache.
#[derive(Debug)]
pub struct CacheRegistry {
    caches: RwLock<HashMap<String, Arc<dyn Cache>>>,
    default_name: RwLock<String>,
}

impl CacheRegistry {
    // == Constructors ==
    /// Creates an empty registry whose default name is "memory".
    pub fn new() -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            default_name: RwLock::new(MEMORY_CACHE.to_string()),
        }
    }

    /// Creates a registry holding the standard "memory" and "file" caches.
    ///
    /// Fails if the file cache directory cannot be created.
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = Self::new();
        registry.add_cache(MEMORY_CACHE, Arc::new(MemoryCache::new(config.memory_ttl())))?;
        registry.add_cache(FILE_CACHE, Arc::new(FileCache::new(&config.cache_dir, config.file_ttl())?))?;
        info!(cache_dir = %config.cache_dir.display(), "Cache registry initialized");
        Ok(registry)
    }

    // == Shared Instance ==
    /// Returns the process-wide registry, building it from the environment on
    /// first use.
    pub fn shared() -> Result<Arc<Self>> {
        SHARED
            .get_or_try_init(|| Self::from_config(&Config::from_env()).map(Arc::new))
            .cloned()
    }

    /// Builds the process-wide registry from `config`.
    ///
    /// If it already exists the existing instance is returned unchanged.
    pub fn init_shared(config: &Config) -> Result<Arc<Self>> {
        SHARED
            .get_or_try_init(|| Self::from_config(config).map(Arc::new))
            .cloned()
    }

    // == Add Cache ==
    /// Registers `cache` under `name`.
    pub fn add_cache(&self, name: impl Into<String>, cache: Arc<dyn Cache>) -> Result<()> {
        let name = name.into();
        let mut caches = self.caches.write();
        if caches.contains_key(&name) {
            return Err(CacheError::AlreadyRegistered(name));
        }
        debug!(cache = %name, "Cache registered");
        caches.insert(name, cache);
        Ok(())
    }

    // == Get Cache ==
    /// Returns the cache registered under `name`, or the default when None.
    pub fn get_cache(&self, name: Option<&str>) -> Result<Arc<dyn Cache>> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.default_cache_name(),
        };
        self.caches
            .read()
            .get(&name)
            .cloned()
            .ok_or(CacheError::UnknownCache(name))
    }

    // == Default Cache ==
    /// Makes `name` the cache returned by `get_cache(None)`.
    pub fn set_default_cache(&self, name: &str) -> Result<()> {
        if !self.caches.read().contains_key(name) {
            return Err(CacheError::UnknownCache(name.to_string()));
        }
        *self.default_name.write() = name.to_string();
        info!(cache = name, "Default cache changed");
        Ok(())
    }

    pub fn default_cache_name(&self) -> String {
        self.default_name.read().clone()
    }

    /// Registered cache names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().keys().cloned().collect();
        names.sort();
        names
    }

    // == Get Or Set ==
    /// Memoizes `factory` under `key` in the named (or default) cache.
    ///
    /// Lookup errors are converted into the caller's error type; factory
    /// errors are returned unchanged and never cached.
    pub fn get_or_set<T, E, F>(
        &self,
        cache_name: Option<&str>,
        key: &str,
        factory: F,
        ttl: Option<Duration>,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let cache = self.get_cache(cache_name)?;
        cache.get_or_set(key, factory, ttl)
    }

    // == Memoize ==
    /// Wraps `op` so its results are memoized in the named (or default) cache.
    ///
    /// Tune the wrapper with `with_ttl`, `with_key_prefix` and `with_key_fn`.
    pub fn cached<A, T, E, F>(&self, cache_name: Option<&str>, name: &str, op: F) -> Result<Memoized<A, F>>
    where
        A: Debug + ?Sized,
        F: Fn(&A) -> std::result::Result<T, E>,
    {
        Ok(Memoized::new(self.get_cache(cache_name)?, name, op))
    }

    // == Maintenance ==
    /// Runs `cleanup` on every cache and returns the total removed.
    ///
    /// A failing cache is logged and skipped.
    pub fn cleanup_all(&self) -> usize {
        let mut total = 0;
        for (name, cache) in self.snapshot() {
            match cache.cleanup() {
                Ok(removed) => total += removed,
                Err(e) => warn!(cache = %name, error = %e, "Cache cleanup failed"),
            }
        }
        total
    }

    /// Clears every registered cache, stopping at the first failure.
    pub fn clear_all(&self) -> Result<()> {
        for (name, cache) in self.snapshot() {
            cache.clear()?;
            debug!(cache = %name, "Cache cleared");
        }
        Ok(())
    }

    /// Per-cache statistics keyed by name.
    pub fn stats(&self) -> BTreeMap<String, CacheStats> {
        self.snapshot()
            .into_iter()
            .map(|(name, cache)| (name, cache.stats()))
            .collect()
    }

    /// Copies the map out so backend calls run without the registry lock.
    fn snapshot(&self) -> Vec<(String, Arc<dyn Cache>)> {
        self.caches
            .read()
            .iter()
            .map(|(name, cache)| (name.clone(), Arc::clone(cache)))
            .collect()
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// == Shared Convenience ==
/// Memoizes `factory` under `key` in a cache of the shared registry.
///
/// This is the entry point data-access code uses in front of expensive
/// queries.
pub fn cache_get_or_set<T, E, F>(
    key: &str,
    factory: F,
    ttl: Option<Duration>,
    cache_name: Option<&str>,
) -> std::result::Result<T, E>
where
    T: Serialize + DeserializeOwned,
    E: From<CacheError>,
    F: FnOnce() -> std::result::Result<T, E>,
{
    CacheRegistry::shared()?.get_or_set(cache_name, key, factory, ttl)
}
