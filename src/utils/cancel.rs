use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::protocol::error::{LoomError, Result};

/// Cooperative cancellation signal shared by every suspension point.
///
/// Clones observe the same signal. Cancelling is permanent.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Race `fut` against cancellation.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(LoomError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(LoomError::Cancelled),
            res = fut => res,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_unblocks_pending_future() {
        let token = CancelToken::new();
        let clone = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            clone.cancel();
        });

        let res: Result<()> = token
            .run(async {
                std::future::pending::<()>().await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(LoomError::Cancelled)));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn completed_future_wins_when_not_cancelled() {
        let token = CancelToken::new();
        assert_eq!(token.run(async { Ok(7) }).await.unwrap(), 7);
    }
}
