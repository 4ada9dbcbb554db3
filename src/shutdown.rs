//! Process-wide shutdown signal
//!
//! Replaces a global "running" flag: one `ShutdownSignal` is created at startup
//! and a clone is handed to every task. Tasks `select!` on [`ShutdownSignal::wait`]
//! next to their I/O and timers.

use tokio::sync::watch;

/// Cloneable cancellation handle backed by a `watch` channel
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Raise the signal. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal has been raised
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // The sender lives inside `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
