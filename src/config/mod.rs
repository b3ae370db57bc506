//! System configuration, loaded from the environment (spec §6).

use crate::error::{HermesError, Result};
use crate::models::FailureStrategy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStrategy {
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    pub enabled: bool,
    pub max_workers: usize,
    pub isolated_workspaces: bool,
    pub failure_strategy: FailureStrategy,
    pub max_retries: u32,
    pub merge_strategy: MergeStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub timeout_seconds: u64,
    pub stream_output: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    pub max_consecutive_errors: u32,
    pub no_progress_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HermesConfig {
    pub parallel: ParallelConfig,
    pub ai: AiConfig,
    pub loop_config: LoopConfig,
    pub breaker_state_path: PathBuf,
    pub log_dir: PathBuf,
}

impl HermesConfig {
    /// Loads every input enumerated in spec §6 from the environment (via
    /// `dotenvy`), validating ranges and surfacing violations as
    /// `HermesError::Configuration`.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!(?path, "loaded .env file"),
            Err(e) => tracing::debug!(error = %e, "no .env file loaded"),
        }

        let max_workers = env_parse("PARALLEL_MAX_WORKERS", crate::constants::DEFAULT_MAX_WORKERS)?;
        if max_workers < 1 {
            return Err(HermesError::Configuration(
                "parallel.maxWorkers must be >= 1".to_string(),
            ));
        }

        let max_retries = env_parse("PARALLEL_MAX_RETRIES", crate::constants::DEFAULT_MAX_RETRIES)?;

        let failure_strategy = match env::var("PARALLEL_FAILURE_STRATEGY")
            .unwrap_or_else(|_| "fail-fast".to_string())
            .to_lowercase()
            .as_str()
        {
            "fail-fast" => FailureStrategy::FailFast,
            "continue" => FailureStrategy::Continue,
            other => {
                return Err(HermesError::Configuration(format!(
                    "parallel.failureStrategy must be 'fail-fast' or 'continue', got '{other}'"
                )))
            }
        };

        let merge_strategy = match env::var("PARALLEL_MERGE_STRATEGY")
            .unwrap_or_else(|_| "sequential".to_string())
            .to_lowercase()
            .as_str()
        {
            "sequential" => MergeStrategy::Sequential,
            "parallel" => MergeStrategy::Parallel,
            other => {
                return Err(HermesError::Configuration(format!(
                    "parallel.mergeStrategy must be 'sequential' or 'parallel', got '{other}'"
                )))
            }
        };

        let parallel = ParallelConfig {
            enabled: env_bool("PARALLEL_ENABLED", true),
            max_workers,
            isolated_workspaces: env_bool("PARALLEL_ISOLATED_WORKSPACES", true),
            failure_strategy,
            max_retries,
            merge_strategy,
        };

        let timeout_seconds = env_parse(
            "AI_TIMEOUT_SECONDS",
            crate::constants::DEFAULT_AGENT_TIMEOUT_SECS,
        )?;

        let ai = AiConfig {
            timeout_seconds,
            stream_output: env_bool("AI_STREAM_OUTPUT", false),
        };

        let max_consecutive_errors = env_parse(
            "LOOP_MAX_CONSECUTIVE_ERRORS",
            crate::constants::DEFAULT_MAX_CONSECUTIVE_ERRORS,
        )?;
        let no_progress_threshold = env_parse(
            "LOOP_NO_PROGRESS_THRESHOLD",
            crate::constants::DEFAULT_NO_PROGRESS_THRESHOLD,
        )?;

        let loop_config = LoopConfig {
            max_consecutive_errors,
            no_progress_threshold,
        };

        let breaker_state_path = env::var("BREAKER_STATE_PATH")
            .unwrap_or_else(|_| crate::constants::DEFAULT_BREAKER_STATE_PATH.to_string())
            .into();

        let log_dir = env::var("HERMES_LOG_DIR")
            .unwrap_or_else(|_| crate::constants::DEFAULT_LOG_DIR.to_string())
            .into();

        Ok(Self {
            parallel,
            ai,
            loop_config,
            breaker_state_path,
            log_dir,
        })
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(value) => value.parse().map_err(|_| {
            HermesError::Configuration(format!("{key} must be a valid number, got '{value}'"))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests;
