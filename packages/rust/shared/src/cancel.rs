//! Root cancellation signal.
//!
//! A [`Cancellation`] is cloned into every long-running task. Firing any clone
//! is observed by all of them, both synchronously ([`Cancellation::is_cancelled`],
//! used inside the extractor's traversal) and asynchronously
//! ([`Cancellation::cancelled`], used in `select!` arms).

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable cancellation signal backed by a `watch` channel.
#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// Create a fresh, un-fired signal.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the signal has fired.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal fires.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as `self`, so `wait_for` only returns once fired.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_across_clones() {
        let root = Cancellation::new();
        let child = root.clone();
        assert!(!child.is_cancelled());
        root.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_fire() {
        let root = Cancellation::new();
        let waiter = root.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        root.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("cancelled() should resolve")
            .expect("task should not panic");
    }
}
