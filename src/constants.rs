//! System-wide default values for the Hermes orchestration core.
//! Overridable through [`crate::config::HermesConfig`] environment variables.

/// Default worker count when `parallel.maxWorkers` is unset.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Default retry budget per task (spec §6: `parallel.maxRetries`).
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Fixed delay between retry attempts (spec §4.2).
pub const RETRY_DELAY_MS: u64 = 2_000;

/// Default per-task agent timeout in seconds (spec §6: `ai.timeoutSeconds`).
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 600;

/// Consecutive no-progress loops before the breaker opens (spec §4.5).
pub const DEFAULT_NO_PROGRESS_THRESHOLD: u32 = 3;

/// No-progress loops before the breaker surfaces the half-open warning hint.
pub const DEFAULT_NO_PROGRESS_WARNING: u32 = 2;

/// Consecutive agent errors before the breaker opens regardless of progress.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Submission/result channel capacity is `CHANNEL_CAPACITY_FACTOR * workers` (spec §5).
pub const CHANNEL_CAPACITY_FACTOR: usize = 2;

/// Branch identifiers never exceed this many characters (spec §4.6).
pub const MAX_BRANCH_NAME_LENGTH: usize = 50;

/// Task-name slug portion of a branch name is truncated to this length before
/// the `hermes/<id>-` prefix is applied (spec §4.6).
pub const MAX_BRANCH_SLUG_LENGTH: usize = 30;

/// Default path for the circuit breaker's persisted JSON state (spec §6).
pub const DEFAULT_BREAKER_STATE_PATH: &str = ".hermes/circuit-breaker.json";

/// Default directory for the durable, append-only log file (spec §6).
pub const DEFAULT_LOG_DIR: &str = ".hermes/logs";

/// File name of the durable log inside the log directory.
pub const LOG_FILE_NAME: &str = "hermes.log";
