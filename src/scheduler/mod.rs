//! Scheduler: outer control loop across batches (spec §4.3).

use crate::breaker::CircuitBreaker;
use crate::cancellation::CancellationToken;
use crate::clock::Clock;
use crate::config::MergeStrategy;
use crate::error::{HermesError, Result};
use crate::graph::DependencyGraph;
use crate::models::{ExecutionResult, FailureStrategy, FeatureId, ProgressEvent, Status, Task, TaskResult};
use crate::pool::{ProgressCallback, WorkerPool, WorkerPoolConfig};
use crate::task_store::TaskStore;
use crate::vcs::{MergeOptions, VersionControl};
use crate::workspace::WorkspaceManager;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct SchedulerConfig {
    pub failure_strategy: FailureStrategy,
    pub isolation_enabled: bool,
    /// `sequential` blocks the next batch on this batch's merges; `parallel`
    /// lets merges run in the background while the next batch starts (spec
    /// §6: `parallel.mergeStrategy` — interleaves *across* batches, never
    /// *within* one batch's own merge step, which always runs one task at a
    /// time against the shared base branch).
    pub merge_strategy: MergeStrategy,
}

pub struct Scheduler {
    config: SchedulerConfig,
    pool: Arc<WorkerPool>,
    task_store: Arc<dyn TaskStore>,
    vcs: Arc<dyn VersionControl>,
    workspace_manager: Arc<WorkspaceManager>,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        pool: Arc<WorkerPool>,
        task_store: Arc<dyn TaskStore>,
        vcs: Arc<dyn VersionControl>,
        workspace_manager: Arc<WorkspaceManager>,
        breaker: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            pool,
            task_store,
            vcs,
            workspace_manager,
            breaker,
            clock,
        }
    }

    /// Runs spec §4.3's algorithm end to end: build the graph, plan
    /// batches, and drive each through the breaker, pool, and VCS merge.
    pub async fn run(&self, tasks: Vec<Task>, cancellation: CancellationToken) -> Result<ExecutionResult> {
        let started_at = self.clock.now();
        let mut graph = DependencyGraph::build(tasks)?;
        let batches = graph.plan();
        let batch_total = batches.len();

        info!(batches = batch_total, "execution plan produced");
        for (i, batch) in batches.iter().enumerate() {
            let names: Vec<&str> = batch.iter().map(|t| t.name.as_str()).collect();
            info!(batch = i, tasks = ?names, "planned batch");
        }

        let mut results = Vec::new();
        let mut halted_early = false;
        let mut pending_merges: Vec<tokio::task::JoinHandle<()>> = Vec::new();

        for (batch_index, batch) in batches.into_iter().enumerate() {
            if cancellation.is_cancelled() {
                halted_early = true;
                break;
            }

            if !self.breaker.can_execute() {
                let reason = self.breaker.snapshot().reason;
                warn!(reason, "circuit breaker open, halting run");
                halted_early = true;
                break;
            }

            // `plan()` assumes every task eventually succeeds; re-check each
            // task's dependencies against actual run status before
            // dispatch, since an earlier batch may have failed one of them
            // (spec §4.1: "a FAILED node permanently blocks its descendants
            // for the current run"; §8: "no-children-after-failure").
            let (runnable, skipped): (Vec<Task>, Vec<Task>) = batch.into_iter().partition(|t| {
                t.dependencies
                    .iter()
                    .all(|dep| graph.run_status(dep) == Some(crate::models::RunStatus::Done))
            });

            for task in &skipped {
                warn!(task_id = %task.id, "skipping task, a dependency did not complete");
            }

            if runnable.is_empty() {
                info!(batch = batch_index, skipped = skipped.len(), "batch fully skipped");
                continue;
            }

            let batch_ids: Vec<_> = runnable.iter().map(|t| t.id.clone()).collect();
            for id in &batch_ids {
                graph.mark_running(id)?;
            }

            let batch_results = self
                .pool
                .run_batch(runnable, batch_index, batch_total, cancellation.clone())
                .await;

            let any_success = batch_results.iter().any(|r| r.success);
            let any_error = batch_results.iter().any(|r| !r.success);

            for result in &batch_results {
                if result.success {
                    graph.mark_complete(&result.task_id)?;
                    let _ = self.task_store.set_status(&result.task_id, Status::Completed).await;
                } else {
                    graph.mark_failed(&result.task_id)?;
                    error!(task_id = %result.task_id, error = ?result.error, "task failed");
                }
            }

            self.breaker
                .record_loop(any_success, any_error, batch_index as u64)
                .await?;

            let completed_features: HashSet<FeatureId> = batch_results
                .iter()
                .filter(|r| r.success)
                .filter_map(|r| graph.task(&r.task_id).map(|t| t.feature_id.clone()))
                .collect();
            for feature_id in completed_features {
                if let Ok(tasks) = self.task_store.tasks_for_feature(&feature_id).await {
                    if !tasks.is_empty() && tasks.iter().all(|t| t.status == Status::Completed) {
                        info!(feature = %feature_id, "feature complete");
                    }
                }
            }

            if self.config.isolation_enabled {
                let merge_targets: Vec<(String, String)> = batch_results
                    .iter()
                    .filter(|r| r.success)
                    .filter_map(|r| r.branch.as_ref().map(|b| (r.task_id.to_string(), b.clone())))
                    .collect();

                match self.config.merge_strategy {
                    MergeStrategy::Sequential => {
                        Self::merge_all(&self.vcs, &self.workspace_manager, merge_targets).await;
                    }
                    MergeStrategy::Parallel => {
                        // Never parallelize merges within a single batch's
                        // own step (spec §6) — only let this batch's merges
                        // run in the background while the next batch starts.
                        let vcs = Arc::clone(&self.vcs);
                        let workspace_manager = Arc::clone(&self.workspace_manager);
                        pending_merges.push(tokio::spawn(async move {
                            Self::merge_all(&vcs, &workspace_manager, merge_targets).await;
                        }));
                    }
                }
            }

            info!(
                batch = batch_index,
                successful = batch_results.iter().filter(|r| r.success).count(),
                failed = batch_results.iter().filter(|r| !r.success).count(),
                "batch complete"
            );

            results.extend(batch_results);

            if any_error {
                match self.config.failure_strategy {
                    FailureStrategy::FailFast => {
                        cancellation.cancel();
                        halted_early = true;
                        break;
                    }
                    FailureStrategy::Continue => {}
                }
            }
        }

        // A run never returns while a background merge is still in flight,
        // even in `parallel` mode — only the wait for it is allowed to
        // overlap with later batches' scheduling, not with the run itself.
        for handle in pending_merges {
            let _ = handle.await;
        }

        let finished_at = self.clock.now();
        let successful = results.iter().filter(|r| r.success).count();
        let failed = results.iter().filter(|r| !r.success).count();
        let total_time_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        if halted_early && !self.breaker.can_execute() {
            return Err(HermesError::CircuitOpen {
                reason: self.breaker.snapshot().reason,
            });
        }

        Ok(ExecutionResult {
            results,
            total_time_ms,
            successful,
            failed,
            started_at,
            finished_at,
        })
    }

    /// Merges each `(taskId, branch)` pair one at a time against the base
    /// branch (spec §4.6: the base branch is touched only by the scheduler,
    /// never concurrently). Conflicts fall back to "prefer incoming"; a
    /// fallback failure is logged and the branch left for manual inspection,
    /// never propagated as a run-aborting error.
    async fn merge_all(
        vcs: &Arc<dyn VersionControl>,
        workspace_manager: &Arc<WorkspaceManager>,
        targets: Vec<(String, String)>,
    ) {
        for (task_id, branch) in targets {
            let outcome = vcs
                .merge(
                    workspace_manager.base_path(),
                    &branch,
                    &task_id,
                    MergeOptions {
                        prefer_incoming_on_conflict: true,
                    },
                )
                .await;
            match outcome {
                Ok(o) if !o.merged => {
                    let err = HermesError::MergeConflict {
                        branch: branch.clone(),
                        task: task_id.clone(),
                    };
                    warn!(error = %err, "merge conflict could not be resolved, branch left for manual inspection");
                }
                Err(e) => {
                    warn!(branch, task_id, error = %e, "merge failed");
                }
                Ok(_) => {}
            }
        }
    }
}

pub fn progress_logger() -> ProgressCallback {
    Arc::new(|event: ProgressEvent| {
        info!(
            worker = event.worker_id,
            task = %event.task_id,
            status = ?event.status,
            batch = event.batch_index,
            batch_total = event.batch_total,
            "progress"
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runner::mock::MockAgentRunner;
    use crate::agent_runner::AgentRunner;
    use crate::breaker::CircuitBreakerConfig;
    use crate::clock::TestClock;
    use crate::models::AgentEvent;
    use crate::task_store::InMemoryTaskStore;
    use crate::vcs::git_cli::GitCliAdapter;
    use std::time::Duration;

    fn completed_events() -> Vec<AgentEvent> {
        vec![AgentEvent::Text {
            content: "---HERMES_STATUS---\nSTATUS: COMPLETE\n---END_HERMES_STATUS---".to_string(),
        }]
    }

    /// Returns `BLOCKED` for any task whose id is in `blocked`, `COMPLETE`
    /// otherwise — used to exercise the mid-chain-failure scenario, where a
    /// single scripted response per call (as in [`MockAgentRunner`]) can't
    /// target one specific task among concurrently dispatched ones.
    struct SelectiveRunner {
        blocked: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl AgentRunner for SelectiveRunner {
        async fn execute(
            &self,
            opts: crate::agent_runner::AgentOptions,
            _cancellation: &crate::cancellation::CancellationToken,
        ) -> Result<crate::agent_runner::TextResult> {
            let status = if self.blocked.iter().any(|id| opts.prompt.contains(id)) {
                "BLOCKED"
            } else {
                "COMPLETE"
            };
            let text = format!("---HERMES_STATUS---\nSTATUS: {status}\n---END_HERMES_STATUS---");
            Ok(crate::agent_runner::TextResult {
                text: text.clone(),
                events: vec![AgentEvent::Text { content: text }],
                cost_usd: None,
                duration_ms: 0,
            })
        }

        async fn execute_stream(
            &self,
            opts: crate::agent_runner::AgentOptions,
            cancellation: &crate::cancellation::CancellationToken,
        ) -> Result<tokio::sync::mpsc::Receiver<AgentEvent>> {
            let result = self.execute(opts, cancellation).await?;
            let (tx, rx) = tokio::sync::mpsc::channel(result.events.len().max(1));
            for event in result.events {
                let _ = tx.send(event).await;
            }
            Ok(rx)
        }
    }

    async fn scheduler_with_runner(
        runner: Arc<dyn AgentRunner>,
        failure_strategy: FailureStrategy,
        dir: &std::path::Path,
    ) -> (Scheduler, Arc<dyn TaskStore>) {
        let task_store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new(vec![]));
        let vcs: Arc<dyn VersionControl> = Arc::new(GitCliAdapter::new());
        let workspace_manager = Arc::new(WorkspaceManager::new(
            Arc::clone(&vcs),
            dir.to_path_buf(),
            false,
        ));
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new());

        let pool = Arc::new(WorkerPool::new(
            WorkerPoolConfig {
                worker_count: 3,
                isolate_workspaces: false,
                max_retries: 1,
                retry_delay: Duration::from_millis(1),
                agent_timeout_seconds: 5,
                stream_output: false,
                allowed_tools: vec![],
            },
            runner,
            Arc::clone(&task_store),
            Arc::clone(&workspace_manager),
            Arc::clone(&vcs),
            Arc::clone(&clock),
            None,
        ));

        let breaker = Arc::new(
            CircuitBreaker::load_or_init_with_clock(
                CircuitBreakerConfig {
                    state_path: dir.join("breaker.json"),
                    ..CircuitBreakerConfig::default()
                },
                Arc::clone(&clock),
            )
            .await
            .unwrap(),
        );

        let scheduler = Scheduler::new(
            SchedulerConfig {
                failure_strategy,
                isolation_enabled: false,
                merge_strategy: MergeStrategy::Sequential,
            },
            pool,
            Arc::clone(&task_store),
            vcs,
            workspace_manager,
            breaker,
            clock,
        );

        (scheduler, task_store)
    }

    #[tokio::test]
    async fn mid_chain_failure_under_continue_skips_only_its_descendant() {
        let dir = tempfile::tempdir().unwrap();
        let runner: Arc<dyn AgentRunner> = Arc::new(SelectiveRunner {
            blocked: vec!["T002"],
        });
        let (scheduler, _store) =
            scheduler_with_runner(runner, FailureStrategy::Continue, dir.path()).await;

        let mut t2 = Task::new("T002", "Second", "F1");
        t2.dependencies = ["T001"].iter().map(|s| crate::models::TaskId::from(*s)).collect();
        let mut t3 = Task::new("T003", "Third", "F1");
        t3.dependencies = ["T001"].iter().map(|s| crate::models::TaskId::from(*s)).collect();
        let tasks = vec![Task::new("T001", "First", "F1"), t2, t3, Task::new("T004", "Fourth", "F1")];

        let result = scheduler.run(tasks, CancellationToken::new()).await.unwrap();

        assert_eq!(result.successful, 2);
        assert_eq!(result.failed, 1);
        let ran_ids: Vec<String> = result.results.iter().map(|r| r.task_id.to_string()).collect();
        assert!(!ran_ids.contains(&"T003".to_string()));
    }

    #[tokio::test]
    async fn circuit_opens_and_halts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        // Every task reports IN_PROGRESS, i.e. never COMPLETE, so the first
        // batch is a no-progress loop. `no_progress_threshold: 1` opens the
        // breaker off that single batch — a node whose dependency failed is
        // never dispatched (the gating fix above), so a real multi-batch
        // no-progress streak can't be driven through dependent batches; a
        // threshold of 1 is what actually exercises "refuses to start the
        // next batch" without relying on that.
        let runner: Arc<dyn AgentRunner> = Arc::new(MockAgentRunner::single(vec![AgentEvent::Text {
            content: "---HERMES_STATUS---\nSTATUS: IN_PROGRESS\n---END_HERMES_STATUS---".to_string(),
        }]));

        let task_store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new(vec![]));
        let vcs: Arc<dyn VersionControl> = Arc::new(GitCliAdapter::new());
        let workspace_manager = Arc::new(WorkspaceManager::new(
            Arc::clone(&vcs),
            dir.path().to_path_buf(),
            false,
        ));
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
        let pool = Arc::new(WorkerPool::new(
            WorkerPoolConfig {
                worker_count: 3,
                isolate_workspaces: false,
                max_retries: 1,
                retry_delay: Duration::from_millis(1),
                agent_timeout_seconds: 5,
                stream_output: false,
                allowed_tools: vec![],
            },
            runner,
            Arc::clone(&task_store),
            Arc::clone(&workspace_manager),
            Arc::clone(&vcs),
            Arc::clone(&clock),
            None,
        ));
        let breaker = Arc::new(
            CircuitBreaker::load_or_init_with_clock(
                CircuitBreakerConfig {
                    no_progress_threshold: 1,
                    state_path: dir.path().join("breaker.json"),
                    ..CircuitBreakerConfig::default()
                },
                Arc::clone(&clock),
            )
            .await
            .unwrap(),
        );
        let scheduler = Scheduler::new(
            SchedulerConfig {
                failure_strategy: FailureStrategy::Continue,
                isolation_enabled: false,
                merge_strategy: MergeStrategy::Sequential,
            },
            pool,
            Arc::clone(&task_store),
            vcs,
            workspace_manager,
            breaker,
            clock,
        );

        let t001 = Task::new("T001", "One", "F1");
        let mut t002 = Task::new("T002", "Two", "F1");
        t002.dependencies = ["T001"].iter().map(|s| crate::models::TaskId::from(*s)).collect();

        let err = scheduler
            .run(vec![t001, t002], CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, HermesError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn runs_independent_tasks_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let runner: Arc<dyn AgentRunner> = Arc::new(MockAgentRunner::single(completed_events()));
        let task_store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new(vec![]));
        let vcs: Arc<dyn VersionControl> = Arc::new(GitCliAdapter::new());
        let workspace_manager = Arc::new(WorkspaceManager::new(
            Arc::clone(&vcs),
            dir.path().to_path_buf(),
            false,
        ));
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new());

        let pool = Arc::new(WorkerPool::new(
            WorkerPoolConfig {
                worker_count: 2,
                isolate_workspaces: false,
                max_retries: 1,
                retry_delay: Duration::from_millis(1),
                agent_timeout_seconds: 5,
                stream_output: false,
                allowed_tools: vec![],
            },
            runner,
            Arc::clone(&task_store),
            Arc::clone(&workspace_manager),
            Arc::clone(&vcs),
            Arc::clone(&clock),
            None,
        ));

        let breaker = Arc::new(
            CircuitBreaker::load_or_init_with_clock(
                CircuitBreakerConfig {
                    state_path: dir.path().join("breaker.json"),
                    ..CircuitBreakerConfig::default()
                },
                Arc::clone(&clock),
            )
            .await
            .unwrap(),
        );

        let scheduler = Scheduler::new(
            SchedulerConfig {
                failure_strategy: FailureStrategy::Continue,
                isolation_enabled: false,
                merge_strategy: MergeStrategy::Sequential,
            },
            pool,
            task_store,
            vcs,
            workspace_manager,
            breaker,
            clock,
        );

        let tasks = vec![Task::new("T1", "First", "F1"), Task::new("T2", "Second", "F1")];
        let result = scheduler.run(tasks, CancellationToken::new()).await.unwrap();

        assert_eq!(result.successful, 2);
        assert_eq!(result.failed, 0);
    }
}
