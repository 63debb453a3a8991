//! Cooperative cancellation for jobs.
//!
//! A [`CancelToken`] is shared between the job and whoever may want to stop
//! it (a client-disconnect handler, a Ctrl-C handler). The pipeline checks
//! the token before each file and races the whole job against
//! [`CancelToken::cancelled`]; the losing job future is dropped, which runs
//! its scoped cleanup.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation token for cooperative job cancellation.
///
/// Clones share the same state.
///
/// # Example
///
/// ```
/// use pdfstitch::CancelToken;
///
/// let token = CancelToken::new();
/// let job_token = token.clone();
///
/// token.cancel();
/// assert!(job_token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// Create a token in the non-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent cancel() is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
