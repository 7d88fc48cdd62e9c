//! Cooperative cancellation for effect loops.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Cancellation signal shared between an effect task and its handle.
///
/// Cloning yields another handle to the same signal. Once cancelled it stays
/// cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// New, not yet cancelled token.
    pub fn new() -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            cancel_tx: Arc::new(cancel_tx),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut cancel_rx = self.cancel_tx.subscribe();
        loop {
            if *cancel_rx.borrow_and_update() {
                return;
            }
            // The sender lives in `self`, so this only fails if it is dropped
            if cancel_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if the full duration elapsed, `false` on cancellation.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
