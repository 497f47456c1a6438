//! Cooperative cancellation for gate acquisition.
//!
//! A [`CancellationToken`] is a shared one-way flag: once cancelled it stays cancelled, and every
//! clone observes it. Gates check it at each suspension point of `acquire`.

use crate::error::Cancelled;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable cancellation signal. Clones share the same flag.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// A token that has not fired.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// A token that has already fired.
    pub fn cancelled_token() -> Self {
        let token = Self::new();
        token.cancel();
        token
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(|fired| *fired).await.is_err() {
            // The sender lives in `self`, so the channel cannot close while we wait.
            futures::future::pending::<()>().await;
        }
    }
}

/// Drive `fut` unless `cancel` fires first. An already-fired token wins without polling `fut`.
pub(crate) async fn or_cancelled<F>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, Cancelled>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        out = fut => Ok(out),
    }
}
