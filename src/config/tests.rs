use super::*;
use serial_test::serial;
use std::env;

fn cleanup_test_env() {
    for key in [
        "PARALLEL_ENABLED",
        "PARALLEL_MAX_WORKERS",
        "PARALLEL_ISOLATED_WORKSPACES",
        "PARALLEL_FAILURE_STRATEGY",
        "PARALLEL_MAX_RETRIES",
        "PARALLEL_MERGE_STRATEGY",
        "AI_TIMEOUT_SECONDS",
        "AI_STREAM_OUTPUT",
        "LOOP_MAX_CONSECUTIVE_ERRORS",
        "LOOP_NO_PROGRESS_THRESHOLD",
        "BREAKER_STATE_PATH",
        "HERMES_LOG_DIR",
    ] {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn defaults_are_used_when_unset() {
    cleanup_test_env();
    let config = HermesConfig::load().unwrap();
    assert_eq!(config.parallel.max_workers, crate::constants::DEFAULT_MAX_WORKERS);
    assert_eq!(config.parallel.failure_strategy, FailureStrategy::FailFast);
    assert_eq!(config.parallel.merge_strategy, MergeStrategy::Sequential);
}

#[test]
#[serial]
fn zero_max_workers_is_rejected() {
    cleanup_test_env();
    env::set_var("PARALLEL_MAX_WORKERS", "0");
    let result = HermesConfig::load();
    assert!(result.is_err());
    cleanup_test_env();
}

#[test]
#[serial]
fn unknown_failure_strategy_is_rejected() {
    cleanup_test_env();
    env::set_var("PARALLEL_FAILURE_STRATEGY", "retry-forever");
    let result = HermesConfig::load();
    assert!(result.is_err());
    cleanup_test_env();
}

#[test]
#[serial]
fn continue_strategy_parses_case_insensitively() {
    cleanup_test_env();
    env::set_var("PARALLEL_FAILURE_STRATEGY", "Continue");
    let config = HermesConfig::load().unwrap();
    assert_eq!(config.parallel.failure_strategy, FailureStrategy::Continue);
    cleanup_test_env();
}

#[test]
#[serial]
fn non_numeric_override_is_rejected() {
    cleanup_test_env();
    env::set_var("AI_TIMEOUT_SECONDS", "not-a-number");
    let result = HermesConfig::load();
    assert!(result.is_err());
    cleanup_test_env();
}
