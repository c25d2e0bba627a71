//! Cache Module
//!
//! Named key/value caches with TTL expiration behind one interface.
//!
//! # Backends
//! - [`MemoryCache`]: process-local map guarded by a per-instance lock
//! - [`FileCache`]: one JSON file per key under a cache directory
//!
//! Expiry is lazy: a read that finds an expired entry removes it and reports
//! a miss. `cleanup()` performs the same removal eagerly.

mod backend;
mod entry;
mod file;
mod memoize;
mod memory;
mod registry;
mod stats;


// Re-export public types
pub use backend::{Cache, CacheExt};
pub use entry::{current_timestamp_ms, CacheEntry};
pub use file::FileCache;
pub use memoize::{debug_repr, Memoized};
pub use memory::MemoryCache;
pub use registry::{cache_get_or_set, CacheRegistry};
pub use stats::CacheStats;

// == Public Constants ==
/// Name of the in-memory cache registered by default
pub const MEMORY_CACHE: &str = "memory";

/// Name of the on-disk cache registered by default
pub const FILE_CACHE: &str = "file";

/// Extension of the files owned by a [`FileCache`]
pub const FILE_SUFFIX: &str = "cache";
