//! Process-wide shutdown capability
//!
//! The coordinator never reaches into a global runtime to stop the process.
//! It is handed a [`ShutdownHandle`]; whoever owns the process (the binary, a
//! test) subscribes to it and tears things down when the signal fires.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Shutdown signal receiver
pub type ShutdownReceiver = broadcast::Receiver<()>;

/// Cloneable handle used to request shutdown of the whole runtime
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    /// Shutdown signal sender
    tx: broadcast::Sender<()>,

    /// Set once the first request has been broadcast
    triggered: Arc<AtomicBool>,

    /// Number of shutdown requests, including repeated ones
    requests: Arc<AtomicUsize>,
}

impl ShutdownHandle {
    /// Create a new handle with no subscribers
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: Arc::new(AtomicBool::new(false)),
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get a shutdown receiver
    pub fn subscribe(&self) -> ShutdownReceiver {
        self.tx.subscribe()
    }

    /// Request shutdown of all components
    ///
    /// Only the first request is broadcast. Returns true if this call
    /// initiated the shutdown.
    pub fn shutdown(&self) -> bool {
        self.requests.fetch_add(1, Ordering::SeqCst);

        if self.triggered.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already requested");
            return false;
        }

        info!("Initiating runtime shutdown");
        let _ = self.tx.send(());
        true
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Total number of shutdown requests received
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested
    ///
    /// Returns immediately if it already was.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        if self.is_shutdown() {
            return;
        }
        let _ = rx.recv().await;
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_shutdown_broadcast_once() {
        let handle = ShutdownHandle::new();
        let mut rx = handle.subscribe();

        assert!(handle.shutdown());
        assert!(!handle.shutdown());

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert!(handle.is_shutdown());
        assert_eq!(handle.request_count(), 2);
    }

    #[test]
    fn test_clones_share_state() {
        let handle = ShutdownHandle::new();
        let clone = handle.clone();

        clone.shutdown();
        assert!(handle.is_shutdown());
        assert_eq!(handle.request_count(), 1);
    }

    #[tokio::test]
    async fn test_wait() {
        let handle = ShutdownHandle::new();
        let waiter = handle.clone();

        let task = tokio::spawn(async move { waiter.wait().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.shutdown();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        // Already triggered: returns immediately
        handle.wait().await;
    }
}
