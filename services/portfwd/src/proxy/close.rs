//! Close-once gate shared by the tasks of one relay pair.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

/// Closes a relay pair exactly once.
///
/// Both copy tasks and the shutdown watcher may ask for the close; only the
/// first request wins. Winning flips the `closed` latch that every copy task
/// races its I/O against, and the sockets are released when those tasks
/// drop their halves.
#[derive(Debug)]
pub struct CloseGate {
    closed: AtomicBool,
    tx: watch::Sender<bool>,
}

/// Waits for a [`CloseGate`] to close.
#[derive(Debug, Clone)]
pub struct Closed {
    rx: watch::Receiver<bool>,
}

impl CloseGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            closed: AtomicBool::new(false),
            tx,
        }
    }

    /// Request the close. Returns `true` for the single caller that performed it.
    pub fn close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.tx.send_replace(true);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> Closed {
        Closed {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CloseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl Closed {
    /// Resolve once the gate has closed.
    pub async fn wait(&mut self) {
        // The gate owns the sender for as long as any task can call close(),
        // so a receive error only happens after the pair is gone.
        let _ = self.rx.wait_for(|closed| *closed).await;
    }
}
