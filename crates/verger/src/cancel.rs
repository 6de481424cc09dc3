//! Cooperative cancellation shared by every scenario of a run.

use crate::result::{VergerError, VergerResult};
use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable cancellation flag with a reason.
///
/// Steps and wait loops call [`CancelToken::check`] at each suspension point;
/// a cancelled scenario unwinds through its normal cleanup path.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<Option<String>>>,
    rx: watch::Receiver<Option<String>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Create an untriggered token
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Trigger cancellation; the first reason wins
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                false
            } else {
                *current = Some(reason);
                true
            }
        });
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The reason given to [`CancelToken::cancel`]
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// `Err(Cancelled)` once cancellation was requested
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` with the recorded reason
    pub fn check(&self) -> VergerResult<()> {
        match self.reason() {
            Some(reason) => Err(VergerError::cancelled(reason)),
            None => Ok(()),
        }
    }

    /// Resolve once cancellation is requested
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while rx.borrow_and_update().is_none() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
