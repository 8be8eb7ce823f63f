//! Graceful shutdown handling

use std::future::Future;
use tokio::signal;
use tracing::{error, info};

/// Resolve when SIGINT (Ctrl+C) or SIGTERM is received.
///
/// If a handler cannot be installed the error is logged and that signal is
/// never observed.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

/// Wait for `signal`, then run `cleanup` before letting the server stop.
pub async fn shutdown_with_cleanup<S, F, Fut>(signal: S, cleanup: F)
where
    S: Future<Output = ()>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    signal.await;

    info!("Running shutdown cleanup tasks");
    cleanup().await;
    info!("Cleanup complete, proceeding with shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_cleanup_runs_after_signal() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cleaned);

        shutdown_with_cleanup(async {}, || async move {
            flag.store(true, Ordering::SeqCst);
        })
        .await;

        assert!(cleaned.load(Ordering::SeqCst));
    }
}
