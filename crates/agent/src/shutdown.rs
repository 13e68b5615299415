use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown plumbing for the agent's long-running tasks.
///
/// The returned token is cloned into the update feed, the dispatcher,
/// and the metrics server; cancelling it starts the ordered drain in
/// `startup::run`. The first SIGINT/SIGTERM cancels the token; a
/// second signal skips the drain and exits immediately, so an
/// operator is never stuck behind a reconcile pass that is blocked on
/// the external toolchain.
pub fn create_shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, draining feed, dispatcher, and metrics tasks");
        token_clone.cancel();

        shutdown_signal().await;
        warn!("second shutdown signal, exiting without draining");
        std::process::exit(1);
    });

    token
}

/// Wait for the next SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
