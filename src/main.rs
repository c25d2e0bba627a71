//! Nova Cache maintenance daemon
//!
//! Opens the configured caches, reports their state, and sweeps expired
//! entries until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nova_cache::{spawn_cleanup_task, CacheRegistry, Config};

/// Entry point for the cache maintenance daemon.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the shared cache registry
/// 4. Run one cleanup pass and log per-cache statistics
/// 5. Start the periodic TTL cleanup task
/// 6. Wait for SIGINT/SIGTERM, then stop the cleanup task
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info", override with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nova_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Nova cache maintenance");

    let config = Config::from_env();
    info!(
        cache_dir = %config.cache_dir.display(),
        memory_ttl = ?config.memory_default_ttl,
        file_ttl = ?config.file_default_ttl,
        cleanup_interval = config.cleanup_interval,
        "Configuration loaded"
    );

    let registry = CacheRegistry::init_shared(&config).context("failed to open caches")?;

    let sweep = Arc::clone(&registry);
    let removed = tokio::task::spawn_blocking(move || sweep.cleanup_all())
        .await
        .context("initial cleanup did not finish")?;
    info!(removed, "Initial cleanup complete");

    for (name, stats) in registry.stats() {
        info!(cache = %name, stats = %serde_json::to_string(&stats)?, "Cache statistics");
    }

    let cleanup_handle = spawn_cleanup_task(Arc::clone(&registry), Duration::from_secs(config.cleanup_interval));
    info!("Background cleanup task started");

    shutdown_signal().await?;

    cleanup_handle.abort();
    warn!("Cleanup task aborted");
    info!("Shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<anyhow::Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        }
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
    Ok(())
}
