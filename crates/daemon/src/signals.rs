//! Signal handling for graceful shutdown.
//!
//! SIGTERM and SIGINT (Ctrl+C) trigger the scheduler's [`Shutdown`] handle.
//! A run in progress is not interrupted; the scheduler stops at its next
//! tick boundary.

use rebaiser_core::Shutdown;
use tracing::{error, info};

/// Resolve once SIGTERM or SIGINT is received.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
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
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("received SIGTERM");
        }
    }
}

/// Spawn a task that triggers `shutdown` on the first termination signal.
pub fn spawn_listener(shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received, finishing current run before exit");
        shutdown.trigger();
    })
}
