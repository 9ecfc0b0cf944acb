//! mf-server: HTTP API server and background retention sweep.
//!
//! This crate ties the other mf-* crates into a running server:
//!
//! - Axum-based HTTP API (catalog, download probe/start, progress, files)
//! - Background sweep reclaiming expired jobs and artifacts
//! - Graceful shutdown via signal handling

pub mod context;
pub mod error;
pub mod middleware;
pub mod router;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use mf_core::config::Config;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// Start the muxfetch server.
///
/// Discovers external tools, builds the [`AppContext`], spawns the retention
/// sweeper, and serves HTTP until a shutdown signal arrives.
pub async fn start(config: Config) -> mf_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let tools = Arc::new(mf_av::ToolRegistry::discover(&config.tools));
    for info in tools.check_all() {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}", info.name);
        }
    }

    let ctx = AppContext::production(config.clone(), tools)?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| mf_core::Error::Internal(format!("Invalid server address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| mf_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    serve(ctx, listener, CancellationToken::new()).await
}

/// Serve `ctx` on `listener` until a signal arrives or `cancel` fires.
pub async fn serve(
    ctx: AppContext,
    listener: tokio::net::TcpListener,
    cancel: CancellationToken,
) -> mf_core::Result<()> {
    let sweeper_handle = tokio::spawn(mf_jobs::run_retention_sweeper(
        Arc::clone(ctx.jobs()),
        ctx.config.jobs.sweep_interval(),
        cancel.clone(),
    ));

    let app = router::build_router(ctx);
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Starting server on {addr}");
    }

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .map_err(|e| mf_core::Error::Internal(format!("Server error: {e}")));

    // Signal background tasks to stop and wait for them.
    cancel.cancel();
    let _ = sweeper_handle.await;

    tracing::info!("Server shutdown complete");
    result
}

/// Wait for a shutdown signal (SIGINT or SIGTERM) or cancellation.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
