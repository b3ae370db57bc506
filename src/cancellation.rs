//! A single root cancellation token threaded from the scheduler through the
//! pool to each agent invocation (spec §5). Modeled on the atomic-flag plus
//! async-notify combination the teacher's circuit breaker and
//! `atomic_state` use for cross-task coordination, rather than pulling in
//! `tokio-util` (unused by any repo in the grounding corpus for this
//! purpose).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancellationToken::cancel`] has been called. Safe to
    /// call from `tokio::select!` alongside the work being cancelled.
    pub async fn cancelled(&self) {
        // Register as a waiter before checking the flag, otherwise a
        // `cancel()` landing between the check and the `notified().await`
        // below would wake nobody and this future would hang forever.
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
