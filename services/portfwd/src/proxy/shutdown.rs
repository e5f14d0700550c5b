//! Shutdown latch.
//!
//! A single `watch` channel carries the process-wide cancellation signal.
//! Once set to `true` it never goes back, so every receiver observes it no
//! matter when it starts waiting.

use tokio::sync::watch;
use tracing::{info, warn};

/// Sender side of the shutdown latch.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

/// Receiver side of the shutdown latch. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownRx {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> (Self, ShutdownRx) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ShutdownRx { rx })
    }

    /// Fire the latch. Returns `true` only for the call that fired it.
    pub fn trigger(&self) -> bool {
        let mut fired = false;
        self.tx.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                fired = true;
                true
            }
        });
        fired
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownRx {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the latch has fired or every sender is gone.
    pub async fn wait(&mut self) {
        // wait_for checks the current value first, so a latch fired before
        // this call is seen immediately.
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

/// Fire `shutdown` on the first SIGINT or SIGTERM.
///
/// Keeps running afterwards so that repeated signals are absorbed; callers
/// abort the task once the proxies have drained.
pub async fn watch_signals(shutdown: Shutdown) {
    loop {
        let name = wait_for_signal().await;
        if shutdown.trigger() {
            info!(signal = name, "Received shutdown signal");
        } else {
            warn!(signal = name, "Shutdown already in progress, ignoring signal");
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        name = ctrl_c() => name,
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for SIGINT");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
