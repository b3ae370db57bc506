//! Circuit Breaker: persistent throttling state machine based on forward
//! progress across scheduler loops (spec §4.5).

use crate::clock::{Clock, SystemClock};
use crate::constants::{
    DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_NO_PROGRESS_THRESHOLD, DEFAULT_NO_PROGRESS_WARNING,
};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "HALF_OPEN")]
    HalfOpen,
    #[serde(rename = "OPEN")]
    Open,
}

impl CircuitState {
    fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::HalfOpen => "HALF_OPEN",
            CircuitState::Open => "OPEN",
        }
    }
}

/// Persisted record, written atomically (write-temp-then-rename) after
/// every mutation (spec §3, §6, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub current_loop: u64,
    pub last_progress_loop: u64,
    pub consecutive_no_progress: u32,
    pub consecutive_errors: u32,
    pub total_opens: u64,
    pub reason: String,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

impl CircuitBreakerState {
    fn initial(now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            state: CircuitState::Closed,
            current_loop: 0,
            last_progress_loop: 0,
            consecutive_no_progress: 0,
            consecutive_errors: 0,
            total_opens: 0,
            reason: String::new(),
            last_updated: now,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub no_progress_threshold: u32,
    pub no_progress_warning: u32,
    pub max_consecutive_errors: u32,
    pub state_path: PathBuf,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            no_progress_threshold: DEFAULT_NO_PROGRESS_THRESHOLD,
            no_progress_warning: DEFAULT_NO_PROGRESS_WARNING,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            state_path: PathBuf::from(crate::constants::DEFAULT_BREAKER_STATE_PATH),
        }
    }
}

type StateChangeHook = Box<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Persistent progress-gating state machine. Cheap to clone: the inner
/// state lives behind an `Arc<RwLock<_>>`.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitBreakerState>>,
    clock: Arc<dyn Clock>,
    on_state_change: Arc<RwLock<Option<StateChangeHook>>>,
}

impl CircuitBreaker {
    /// Loads persisted state from `config.state_path` if present, else
    /// initializes fresh (`CLOSED`, all counters zero).
    pub async fn load_or_init(config: CircuitBreakerConfig) -> Result<Self> {
        Self::load_or_init_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn load_or_init_with_clock(
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let state = match tokio::fs::read(&config.state_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                CircuitBreakerState::initial(clock.now())
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(state)),
            clock,
            on_state_change: Arc::new(RwLock::new(None)),
        })
    }

    /// Installs an observer invoked synchronously on every state transition
    /// (spec §4.5: `onStateChange`). Replaces any previously installed hook.
    pub fn set_on_state_change(&self, hook: impl Fn(&str, &str, &str) + Send + Sync + 'static) {
        *self.on_state_change.write().unwrap() = Some(Box::new(hook));
    }

    /// `false` iff the circuit is `OPEN` (spec §4.5).
    pub fn can_execute(&self) -> bool {
        self.state.read().unwrap().state != CircuitState::Open
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        self.state.read().unwrap().clone()
    }

    /// Updates counters from one loop's outcome and advances the state
    /// machine, persisting the result (spec §4.5).
    pub async fn record_loop(&self, has_progress: bool, had_error: bool, loop_index: u64) -> Result<()> {
        let (from, to, reason) = {
            let mut s = self.state.write().unwrap();
            let from = s.state;

            s.current_loop = loop_index;
            if has_progress {
                s.consecutive_no_progress = 0;
                s.last_progress_loop = loop_index;
            } else {
                s.consecutive_no_progress += 1;
            }
            if had_error {
                s.consecutive_errors += 1;
            } else {
                s.consecutive_errors = 0;
            }

            let mut reason = String::new();
            match from {
                CircuitState::Closed => {
                    if s.consecutive_no_progress >= self.config.no_progress_threshold
                        || s.consecutive_errors >= self.config.max_consecutive_errors
                    {
                        s.state = CircuitState::Open;
                        s.total_opens += 1;
                        reason = format!(
                            "no progress for {} loop(s) / {} consecutive error(s)",
                            s.consecutive_no_progress, s.consecutive_errors
                        );
                    } else if s.consecutive_no_progress >= self.config.no_progress_warning {
                        s.state = CircuitState::HalfOpen;
                        reason = format!(
                            "no progress for {} loop(s), approaching threshold",
                            s.consecutive_no_progress
                        );
                    }
                }
                CircuitState::HalfOpen => {
                    if has_progress {
                        s.state = CircuitState::Closed;
                        reason = "progress observed, circuit closed".to_string();
                    } else {
                        s.state = CircuitState::Open;
                        s.total_opens += 1;
                        reason = "no progress observed while half-open".to_string();
                    }
                }
                CircuitState::Open => {
                    // Only an explicit reset or manual trial leaves OPEN.
                }
            }

            if !reason.is_empty() {
                s.reason = reason.clone();
            }
            s.last_updated = self.clock.now();
            (from, s.state, s.reason.clone())
        };

        if from != to {
            self.notify_state_change(from, to, &reason);
        }
        self.persist().await
    }

    /// Forces `CLOSED`, zeroing progress/error counters; used for manual
    /// operator recovery (spec §4.5: `reset(reason)`).
    pub async fn reset(&self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let from = {
            let mut s = self.state.write().unwrap();
            let from = s.state;
            s.state = CircuitState::Closed;
            s.consecutive_no_progress = 0;
            s.consecutive_errors = 0;
            s.reason = reason.clone();
            s.last_updated = self.clock.now();
            from
        };
        if from != CircuitState::Closed {
            self.notify_state_change(from, CircuitState::Closed, &reason);
        }
        self.persist().await
    }

    fn notify_state_change(&self, from: CircuitState, to: CircuitState, reason: &str) {
        if let Some(hook) = self.on_state_change.read().unwrap().as_ref() {
            hook(from.as_str(), to.as_str(), reason);
        } else {
            match to {
                CircuitState::Open => warn!(%reason, "circuit breaker opened"),
                CircuitState::Closed => info!(%reason, "circuit breaker closed"),
                CircuitState::HalfOpen => warn!(%reason, "circuit breaker half-open"),
            }
        }
    }

    async fn persist(&self) -> Result<()> {
        let snapshot = self.snapshot();
        write_atomic(&self.config.state_path, &snapshot).await
    }
}

async fn write_atomic(path: &Path, state: &CircuitBreakerState) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let bytes = serde_json::to_vec_pretty(state)?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;

    fn config(path: &Path) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            no_progress_threshold: 3,
            no_progress_warning: 2,
            max_consecutive_errors: 5,
            state_path: path.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn starts_closed_when_no_state_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let breaker =
            CircuitBreaker::load_or_init(config(&dir.path().join("breaker.json")))
                .await
                .unwrap();
        assert!(breaker.can_execute());
        assert_eq!(breaker.snapshot().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_no_progress_loops() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(TestClock::new());
        let breaker = CircuitBreaker::load_or_init_with_clock(
            config(&dir.path().join("breaker.json")),
            clock,
        )
        .await
        .unwrap();

        breaker.record_loop(false, false, 1).await.unwrap();
        assert!(breaker.can_execute());
        breaker.record_loop(false, false, 2).await.unwrap();
        assert!(breaker.can_execute());
        breaker.record_loop(false, false, 3).await.unwrap();

        assert!(!breaker.can_execute());
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.total_opens, 1);
    }

    #[tokio::test]
    async fn half_open_closes_on_progress_and_opens_on_no_progress() {
        let dir = tempfile::tempdir().unwrap();
        let breaker =
            CircuitBreaker::load_or_init(config(&dir.path().join("breaker.json")))
                .await
                .unwrap();

        breaker.record_loop(false, false, 1).await.unwrap();
        breaker.record_loop(false, false, 2).await.unwrap();
        assert_eq!(breaker.snapshot().state, CircuitState::HalfOpen);

        breaker.record_loop(true, false, 3).await.unwrap();
        assert_eq!(breaker.snapshot().state, CircuitState::Closed);

        // Drive back to half-open then fail to observe the open transition.
        breaker.record_loop(false, false, 4).await.unwrap();
        breaker.record_loop(false, false, 5).await.unwrap();
        assert_eq!(breaker.snapshot().state, CircuitState::HalfOpen);
        breaker.record_loop(false, false, 6).await.unwrap();
        assert_eq!(breaker.snapshot().state, CircuitState::Open);
    }

    #[tokio::test]
    async fn record_loop_is_idempotent_modulo_loop_index_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let breaker =
            CircuitBreaker::load_or_init(config(&dir.path().join("breaker.json")))
                .await
                .unwrap();

        breaker.record_loop(true, false, 5).await.unwrap();
        let first = breaker.snapshot();
        breaker.record_loop(true, false, 5).await.unwrap();
        let second = breaker.snapshot();

        assert_eq!(first.state, second.state);
        assert_eq!(first.consecutive_no_progress, second.consecutive_no_progress);
        assert_eq!(first.consecutive_errors, second.consecutive_errors);
        assert_eq!(first.total_opens, second.total_opens);
    }

    #[tokio::test]
    async fn persistence_round_trips_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("breaker.json");
        let breaker = CircuitBreaker::load_or_init(config(&path)).await.unwrap();
        breaker.record_loop(false, true, 7).await.unwrap();

        let reloaded = CircuitBreaker::load_or_init(config(&path)).await.unwrap();
        let before = breaker.snapshot();
        let after = reloaded.snapshot();
        assert_eq!(before.state, after.state);
        assert_eq!(before.current_loop, after.current_loop);
        assert_eq!(before.consecutive_errors, after.consecutive_errors);
        assert_eq!(before.total_opens, after.total_opens);
    }

    #[tokio::test]
    async fn reset_forces_closed_and_zeros_counters() {
        let dir = tempfile::tempdir().unwrap();
        let breaker =
            CircuitBreaker::load_or_init(config(&dir.path().join("breaker.json")))
                .await
                .unwrap();
        breaker.record_loop(false, false, 1).await.unwrap();
        breaker.record_loop(false, false, 2).await.unwrap();
        breaker.record_loop(false, false, 3).await.unwrap();
        assert!(!breaker.can_execute());

        breaker.reset("operator override").await.unwrap();
        assert!(breaker.can_execute());
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.consecutive_no_progress, 0);
        assert_eq!(snapshot.consecutive_errors, 0);
    }
}
