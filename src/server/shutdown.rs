//! Coordinated shutdown
//!
//! `main` owns the [`ShutdownController`]; the controller loop and the health server hold
//! [`ShutdownSignal`] clones and stop when it fires.

use tokio::sync::watch;
use tracing::info;

/// Receiving side of the shutdown channel
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once shutdown was triggered (or the controller was dropped)
    pub async fn wait(&mut self) {
        // wait_for only errs when the sender is gone, which also means shutdown
        let _ = self.receiver.wait_for(|stop| *stop).await;
    }

    /// Owned variant of [`wait`](Self::wait), for APIs that take a `'static` future
    pub async fn cancelled(mut self) {
        self.wait().await
    }

    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Sending side of the shutdown channel
pub struct ShutdownController {
    sender: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn shutdown(&self) {
        // send_replace never fails, even with no receivers left
        self.sender.send_replace(true);
        info!("Shutdown signal sent");
    }
}

pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownController { sender }, ShutdownSignal { receiver })
}

/// Wait for SIGTERM or SIGINT and return the name of the signal received
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    info!(signal = name, "Received termination signal");
    Ok(name)
}

/// Wait for Ctrl+C
#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    info!(signal = "CTRL_C", "Received termination signal");
    Ok("CTRL_C")
}
