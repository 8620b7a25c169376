//! Graceful shutdown
//!
//! Both binaries stop on Ctrl+C or SIGTERM by cancelling one
//! [`CancellationToken`] that every route and consumer task watches.

use std::future::Future;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Resolve on the first Ctrl+C or SIGTERM
///
/// A handler that cannot be installed is logged and never fires, leaving the
/// other one in charge.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, starting graceful shutdown"),
            Err(e) => {
                error!(error = %e, "Cannot listen for Ctrl+C");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown");
            },
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Token cancelled once `trigger` resolves
pub fn cancel_on<F>(trigger: F) -> CancellationToken
where
    F: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            trigger.await;
            token.cancel();
        }
    });
    token
}

/// Token cancelled on Ctrl+C or SIGTERM
pub fn shutdown_token() -> CancellationToken {
    cancel_on(shutdown_signal())
}
