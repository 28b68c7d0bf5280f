//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGTERM or SIGINT
//! - Translate either into a shutdown trigger

use tokio::signal::unix::{signal, SignalKind};

use crate::lifecycle::shutdown::Shutdown;

/// Wait for a termination signal, then trigger `shutdown`.
///
/// Also returns if another party triggers shutdown first.
pub async fn wait_for_termination(shutdown: Shutdown) {
    let mut stopped = shutdown.subscribe();
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler");
            None
        }
    };

    let sigterm = async {
        match terminate.as_mut() {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!(signal = "SIGINT", "Termination signal received"),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGINT");
                return;
            }
        },
        _ = sigterm => tracing::info!(signal = "SIGTERM", "Termination signal received"),
        _ = stopped.recv() => return,
    }

    shutdown.trigger();
}
