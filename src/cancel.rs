use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Caller-held cancellation signal, threaded through every suspend point of an issuance.
///
/// Clones share the same signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Cancels every operation observing this token.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();

        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // sender is owned by `self` so this cannot close; never resolve
            std::future::pending::<()>().await;
        }
    }

    /// Runs `fut` unless cancelled first.
    pub(crate) async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tokio::select! {
            biased;

            _ = self.cancelled() => Err(Error::Cancelled),
            res = fut => res,
        }
    }

    pub(crate) async fn sleep(&self, duration: Duration) -> Result<()> {
        if duration.is_zero() {
            return if self.is_cancelled() {
                Err(Error::Cancelled)
            } else {
                Ok(())
            };
        }

        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}
