//! OS signal handling.
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGINT and, on unix, SIGTERM both start a graceful shutdown

use super::Shutdown;

/// Wait for Ctrl+C (or SIGTERM) and trigger `shutdown`.
///
/// Returns early, without triggering, if shutdown was started elsewhere.
pub async fn wait_for_signal(shutdown: Shutdown) {
    let token = shutdown.token().clone();
    tokio::select! {
        _ = ctrl_c() => {
            tracing::info!("Shutdown signal received");
            shutdown.trigger();
        }
        _ = terminate() => {
            tracing::info!("Terminate signal received");
            shutdown.trigger();
        }
        _ = token.cancelled() => {}
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
