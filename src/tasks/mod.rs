//! Background Tasks Module
//!
//! Periodic maintenance that runs alongside the caches.
//!
//! # Tasks
//! - TTL Cleanup: purges expired entries from every registered cache

mod cleanup;

pub use cleanup::spawn_cleanup_task;
