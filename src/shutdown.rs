//! Cooperative shutdown: process signals → cancellation token.

use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGINT and SIGTERM.
///
/// Returns a `CancellationToken` that is cancelled when either signal is
/// received. The worker loop observes the token at cycle boundaries and
/// finishes in-flight work before exiting.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Stop requested, finishing current cycle");
        token_clone.cancel();
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received Ctrl+C");
    }
}
