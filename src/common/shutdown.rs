//! One-shot termination signal shared between tasks.

use std::future::Future;

use tokio::sync::watch;

/// A latch that flips once from running to terminated.
///
/// Any number of tasks can `wait()` on it; waiters registered after the
/// latch flipped resolve immediately.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx,
        }
    }

    /// Flip the latch. Calling it more than once has no further effect.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_terminated(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the latch has flipped.
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            let _ = rx.wait_for(|terminated| *terminated).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Shutdown;

    #[tokio::test]
    async fn test_wait_resolves_after_shutdown() {
        let shutdown = Shutdown::new();
        let wait = shutdown.wait();
        assert!(!shutdown.is_terminated());

        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(1), wait).await.unwrap();
        assert!(shutdown.is_terminated());

        // late waiters do not block
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait()).await.unwrap();
    }
}
