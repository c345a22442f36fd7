//! Flash Cache - caching proxy in front of the flashcard REST backend
//!
//! Hosts one shared request cache, exposes its admin endpoints and serves
//! upstream reads through it.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flash_cache::api::{create_router, AppState};
use flash_cache::cache::{CacheEvent, CacheHooks, ProcessMemoryProbe};
use flash_cache::{spawn_cleanup_task, spawn_memory_monitor, Config};

/// Main entry point for the cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the cache, restoring persisted entries
/// 4. Start background TTL sweep and memory monitor
/// 5. Serve HTTP until SIGINT/SIGTERM, then flush the cache
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flash_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Flash Cache server");

    let config = Config::from_env();
    info!(
        "Configuration loaded: max_size={}, ttl={}ms, port={}, persist={}, upstream={}",
        config.cache.max_size,
        config.cache.ttl.as_millis(),
        config.server_port,
        config.cache.persist,
        config.upstream_url.as_deref().unwrap_or("none")
    );

    let hooks = CacheHooks::new().on_error(|event| {
        if let CacheEvent::Error { error } = event {
            error!(error = %error, "Cache reported an error");
        }
    });
    let state = AppState::from_config(&config, hooks).await;
    info!("Cache initialized with {} entries", state.cache.size().await);

    let mut background = Vec::new();
    if config.cache.auto_cleanup {
        background.push(spawn_cleanup_task(
            state.cache.clone(),
            config.cache.cleanup_interval,
        ));
    }
    let probe = Arc::new(ProcessMemoryProbe::new(config.cache.memory_limit_bytes));
    background.push(spawn_memory_monitor(
        state.cache.clone(),
        probe,
        config.cache.memory_check_interval,
    ));

    let cache = state.cache.clone();
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(background))
        .await
        .context("server error")?;

    if cache.config().persist {
        if let Err(e) = cache.flush().await {
            warn!(error = %e, "Final cache flush failed");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then aborts background tasks.
async fn shutdown_signal(background: Vec<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    for handle in background {
        handle.abort();
    }
    warn!("Background tasks aborted");
}
