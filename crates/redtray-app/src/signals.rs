//! OS signal handling
//!
//! SIGINT/SIGTERM request a graceful shutdown. SIGUSR1 mirrors redshift's own
//! contract and toggles inhibition, so `pkill -USR1 redshift-tray` works the
//! same way as signalling the daemon directly.

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use redtray_core::prelude::*;

use crate::message::Message;

/// Spawn a task that listens for termination signals and sends quit messages
pub fn spawn_signal_handler(tx: mpsc::Sender<Message>) {
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!("Signal handler error: {}", e);
            return;
        }

        info!("Shutdown signal received");
        let _ = tx.send(Message::Quit).await;
    });
}

/// Wait for a termination signal
async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
    }

    Ok(())
}

/// Spawn a task converting every SIGUSR1 into a toggle request
pub fn spawn_toggle_handler(tx: mpsc::Sender<Message>) {
    tokio::spawn(async move {
        let mut sigusr1 = match signal(SignalKind::user_defined1()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to create SIGUSR1 handler: {}", e);
                return;
            }
        };

        while sigusr1.recv().await.is_some() {
            debug!("Received SIGUSR1");
            if tx.send(Message::ToggleSignal).await.is_err() {
                break;
            }
        }
    });
}
