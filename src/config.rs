//! Configuration Module
//!
//! Loads cache and dispatcher settings from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default directory for the file cache, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = "data/cache";

/// Cache and dispatcher configuration.
///
/// Values are read once and handed to constructors; nothing queries the
/// environment after startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the file cache entries
    pub cache_dir: PathBuf,
    /// Default TTL in seconds for the "memory" cache, None = never expires
    pub memory_default_ttl: Option<u64>,
    /// Default TTL in seconds for the "file" cache, None = never expires
    pub file_default_ttl: Option<u64>,
    /// Upper bound on threads used for blocking work
    pub blocking_pool_size: usize,
    /// Worker count for task queues built from this config
    pub queue_workers: usize,
    /// Interval in seconds between maintenance cleanup runs
    pub cleanup_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DIR` - File cache directory (default: data/cache)
    /// - `MEMORY_CACHE_TTL` - Memory cache TTL in seconds (default: 3600)
    /// - `FILE_CACHE_TTL` - File cache TTL in seconds (default: 86400)
    /// - `BLOCKING_POOL_SIZE` - Blocking thread pool size (default: 10)
    /// - `QUEUE_WORKERS` - Task queue workers (default: 4)
    /// - `CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 300)
    ///
    /// A TTL of `0` or `none` disables expiry for that cache.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_dir: env::var("CACHE_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            memory_default_ttl: ttl_from_env("MEMORY_CACHE_TTL")
                .unwrap_or(defaults.memory_default_ttl),
            file_default_ttl: ttl_from_env("FILE_CACHE_TTL").unwrap_or(defaults.file_default_ttl),
            blocking_pool_size: env::var("BLOCKING_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.blocking_pool_size),
            queue_workers: env::var("QUEUE_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.queue_workers),
            cleanup_interval: env::var("CLEANUP_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &u64| *n > 0)
                .unwrap_or(defaults.cleanup_interval),
        }
    }

    /// Memory cache default TTL as a Duration.
    pub fn memory_ttl(&self) -> Option<Duration> {
        self.memory_default_ttl.map(Duration::from_secs)
    }

    /// File cache default TTL as a Duration.
    pub fn file_ttl(&self) -> Option<Duration> {
        self.file_default_ttl.map(Duration::from_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            memory_default_ttl: Some(3600),
            file_default_ttl: Some(86_400),
            blocking_pool_size: 10,
            queue_workers: 4,
            cleanup_interval: 300,
        }
    }
}

/// Parses a TTL variable. Outer None = unset or unparseable, inner None = no expiry.
fn ttl_from_env(name: &str) -> Option<Option<u64>> {
    let raw = env::var(name).ok()?;
    parse_ttl(&raw)
}

fn parse_ttl(raw: &str) -> Option<Option<u64>> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("none") {
        return Some(None);
    }
    match raw.parse::<u64>().ok()? {
        0 => Some(None),
        secs => Some(Some(secs)),
    }
}
