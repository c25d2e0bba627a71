//! Nova Cache - caching and async dispatch for a desktop analytics app
//!
//! Provides named in-memory and on-disk caches with TTL expiration, result
//! memoization, and a background event loop for running async work from
//! synchronous code.

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod tasks;

pub use cache::{cache_get_or_set, Cache, CacheExt, CacheRegistry, FileCache, Memoized, MemoryCache};
pub use config::Config;
pub use dispatch::{
    gather_settled_with_concurrency, gather_with_concurrency, run_async, run_blocking, wait_for_with_timeout, AsyncTask, BoundedTaskQueue,
    Dispatcher, TaskHandle, TaskState,
};
pub use error::{CacheError, DispatchError, TaskFailure};
pub use tasks::spawn_cleanup_task;
