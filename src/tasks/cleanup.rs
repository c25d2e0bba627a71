//! TTL Cleanup Task
//!
//! Background task that periodically purges expired entries from every
//! registered cache.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheRegistry;

/// Spawns a task that runs `cleanup_all` on `registry` every `interval`.
///
/// The sweep itself runs on the blocking pool because file caches scan
/// their directory.
///
/// # Arguments
/// * `registry` - Registry whose caches are swept
/// * `interval` - Pause between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task; abort it during shutdown.
///
/// # Example
/// ```ignore
/// let registry = CacheRegistry::shared()?;
/// let cleanup_handle = spawn_cleanup_task(registry, Duration::from_secs(300));
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(registry: Arc<CacheRegistry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs_f64(), "Starting TTL cleanup task");

        loop {
            tokio::time::sleep(interval).await;

            let sweep = Arc::clone(&registry);
            let removed = match tokio::task::spawn_blocking(move || sweep.cleanup_all()).await {
                Ok(removed) => removed,
                Err(e) => {
                    warn!(error = %e, "TTL cleanup sweep failed");
                    continue;
                }
            };

            if removed > 0 {
                info!(removed, "TTL cleanup: removed expired entries");
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
        }
    })
}
