//! Turns SIGINT and SIGTERM into a cancellation of the daemon.

use std::io;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancels `shutdown` on the first SIGINT or SIGTERM.
///
/// The handlers stay registered for the life of the process, so signals
/// arriving while the daemon shuts down are swallowed instead of killing it.
pub fn install(shutdown: CancellationToken) -> io::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Received SIGINT, shutting down"),
            _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });

    Ok(())
}
