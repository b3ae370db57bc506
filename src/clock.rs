//! Time abstraction so the retry delay and the circuit breaker's timestamps
//! can be driven by tests without sleeping wall-clock seconds (spec §9).

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A source of "now" and a way to wait, abstracted so tests can fast-forward.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> chrono::DateTime<chrono::Utc>;
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock time, backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A manually advanced clock for deterministic tests. `sleep` returns
/// immediately; call [`TestClock::advance`] to move `now()` forward.
#[derive(Debug, Clone)]
pub struct TestClock {
    millis_since_epoch: Arc<AtomicI64>,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            millis_since_epoch: Arc::new(AtomicI64::new(
                chrono::Utc::now().timestamp_millis(),
            )),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.millis_since_epoch
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TestClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        let millis = self.millis_since_epoch.load(Ordering::SeqCst);
        chrono::DateTime::from_timestamp_millis(millis).unwrap_or_else(chrono::Utc::now)
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
