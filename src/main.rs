//! Minimal binary entry point wiring the orchestration core together.
//!
//! The Markdown task-store, interactive TUI, and CLI argument surface are
//! out of scope for this crate (spec §1) and live in a surrounding driver;
//! this binary demonstrates the wiring by loading a JSON task list and
//! running one scheduler pass against it.

use hermes_core::agent_runner::cli::CliAgentRunner;
use hermes_core::agent_runner::AgentRunner;
use hermes_core::breaker::{CircuitBreaker, CircuitBreakerConfig};
use hermes_core::cancellation::CancellationToken;
use hermes_core::clock::{Clock, SystemClock};
use hermes_core::config::HermesConfig;
use hermes_core::models::{FailureStrategy, Task};
use hermes_core::pool::{WorkerPool, WorkerPoolConfig};
use hermes_core::scheduler::{progress_logger, Scheduler, SchedulerConfig};
use hermes_core::task_store::{InMemoryTaskStore, TaskStore};
use hermes_core::vcs::git_cli::GitCliAdapter;
use hermes_core::vcs::VersionControl;
use hermes_core::workspace::WorkspaceManager;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = HermesConfig::load()?;
    let _log_guard = hermes_core::logging::init(&config.log_dir);
    info!("starting hermes orchestration core");

    let tasks = load_tasks()?;
    let task_store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new(tasks.clone()));

    let runner: Arc<dyn AgentRunner> = match CliAgentRunner::discover().await {
        Ok(runner) => Arc::new(runner),
        Err(e) => {
            error!(error = %e, "no agent binary discovered, aborting");
            return Err(e.into());
        }
    };

    let vcs: Arc<dyn VersionControl> = Arc::new(GitCliAdapter::new());
    let base_path = std::env::current_dir()?;
    let workspace_manager = Arc::new(WorkspaceManager::new(
        Arc::clone(&vcs),
        base_path,
        config.parallel.isolated_workspaces,
    ));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let breaker = Arc::new(
        CircuitBreaker::load_or_init_with_clock(
            CircuitBreakerConfig {
                no_progress_threshold: config.loop_config.no_progress_threshold,
                max_consecutive_errors: config.loop_config.max_consecutive_errors,
                state_path: config.breaker_state_path.clone(),
                ..CircuitBreakerConfig::default()
            },
            Arc::clone(&clock),
        )
        .await?,
    );

    let pool = Arc::new(WorkerPool::new(
        WorkerPoolConfig {
            worker_count: config.parallel.max_workers,
            isolate_workspaces: config.parallel.isolated_workspaces,
            max_retries: config.parallel.max_retries,
            retry_delay: std::time::Duration::from_millis(hermes_core::constants::RETRY_DELAY_MS),
            agent_timeout_seconds: config.ai.timeout_seconds,
            stream_output: config.ai.stream_output,
            allowed_tools: vec![],
        },
        runner,
        Arc::clone(&task_store),
        Arc::clone(&workspace_manager),
        Arc::clone(&vcs),
        Arc::clone(&clock),
        Some(progress_logger()),
    ));

    let scheduler = Scheduler::new(
        SchedulerConfig {
            failure_strategy: config.parallel.failure_strategy,
            isolation_enabled: config.parallel.isolated_workspaces,
            merge_strategy: config.parallel.merge_strategy,
        },
        pool,
        task_store,
        vcs,
        workspace_manager,
        breaker,
        clock,
    );

    let result = scheduler.run(tasks, CancellationToken::new()).await;

    match result {
        Ok(outcome) => {
            info!(
                successful = outcome.successful,
                failed = outcome.failed,
                total_time_ms = outcome.total_time_ms,
                "run complete"
            );
            if outcome.failed > 0 && matches!(config.parallel.failure_strategy, FailureStrategy::FailFast) {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(e) => {
            if e.is_fatal() {
                error!(error = %e, "run aborted due to a fatal error");
            } else {
                warn!(error = %e, "run aborted");
            }
            std::process::exit(if matches!(e, hermes_core::HermesError::CircuitOpen { .. }) {
                2
            } else {
                1
            });
        }
    }
}

/// Loads the task list from `HERMES_TASKS_FILE` (JSON array of [`Task`]), or
/// an empty list if unset — the Markdown task-store scan is an external
/// collaborator (spec §6), not part of this binary.
fn load_tasks() -> anyhow::Result<Vec<Task>> {
    match std::env::var("HERMES_TASKS_FILE") {
        Ok(path) => {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        }
        Err(_) => {
            info!("HERMES_TASKS_FILE not set, starting with an empty task list");
            Ok(vec![])
        }
    }
}