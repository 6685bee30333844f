//! Cooperative shutdown signal shared by every component.
//!
//! A `watch` channel carrying `false` until the process is asked to stop.

use tokio::sync::watch;

/// Create a fresh, not-yet-triggered signal.
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolve once shutdown has been requested or every sender is gone.
pub async fn requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_resolves_on_signal() {
        let (tx, mut rx) = channel();
        tx.send(true).unwrap();
        timeout(Duration::from_secs(1), requested(&mut rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_resolves_when_sender_dropped() {
        let (tx, mut rx) = channel();
        drop(tx);
        timeout(Duration::from_secs(1), requested(&mut rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pending_until_signalled() {
        let (_tx, mut rx) = channel();
        assert!(timeout(Duration::from_millis(50), requested(&mut rx))
            .await
            .is_err());
    }
}
