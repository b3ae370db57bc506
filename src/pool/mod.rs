//! Worker Pool: runs up to N tasks concurrently, each exactly once per
//! retry budget, delivering [`TaskResult`]s through a single output
//! channel (spec §4.2).

use crate::agent_runner::{AgentOptions, AgentRunner};
use crate::analyzer::ResponseAnalyzer;
use crate::cancellation::CancellationToken;
use crate::clock::Clock;
use crate::error::{HermesError, Result};
use crate::models::{
    AnalysisKind, ProgressEvent, ProgressStatus, Status, Task, TaskId, TaskResult,
};
use crate::task_store::TaskStore;
use crate::vcs::VersionControl;
use crate::workspace::WorkspaceManager;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

#[derive(Clone)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub isolate_workspaces: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub agent_timeout_seconds: u64,
    pub stream_output: bool,
    pub allowed_tools: Vec<String>,
}

pub struct WorkerPool {
    config: WorkerPoolConfig,
    runner: Arc<dyn AgentRunner>,
    task_store: Arc<dyn TaskStore>,
    workspace_manager: Arc<WorkspaceManager>,
    vcs: Arc<dyn VersionControl>,
    analyzer: ResponseAnalyzer,
    clock: Arc<dyn Clock>,
    running: Arc<AtomicUsize>,
    on_progress: Option<ProgressCallback>,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: WorkerPoolConfig,
        runner: Arc<dyn AgentRunner>,
        task_store: Arc<dyn TaskStore>,
        workspace_manager: Arc<WorkspaceManager>,
        vcs: Arc<dyn VersionControl>,
        clock: Arc<dyn Clock>,
        on_progress: Option<ProgressCallback>,
    ) -> Self {
        Self {
            config,
            runner,
            task_store,
            workspace_manager,
            vcs,
            analyzer: ResponseAnalyzer::new(),
            clock,
            running: Arc::new(AtomicUsize::new(0)),
            on_progress,
        }
    }

    /// Runs `batch` with `min(configuredWorkers, |batch|)` concurrent
    /// workers and drains exactly `batch.len()` results (spec §4.3 step
    /// 3c-d). Submission is a bounded queue; workers pull until it's
    /// drained.
    pub async fn run_batch(
        &self,
        batch: Vec<Task>,
        batch_index: usize,
        batch_total: usize,
        cancellation: CancellationToken,
    ) -> Vec<TaskResult> {
        let batch_len = batch.len();
        let worker_count = self.config.worker_count.min(batch_len).max(1);

        let (task_tx, task_rx) = mpsc::channel::<Task>(batch_len.max(1));
        let task_rx = Arc::new(tokio::sync::Mutex::new(task_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<TaskResult>(batch_len.max(1));

        for task in batch {
            let _ = task_tx.send(task).await;
        }
        drop(task_tx);

        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 1..=worker_count {
            let task_rx = Arc::clone(&task_rx);
            let result_tx = result_tx.clone();
            let cancellation = cancellation.clone();
            let pool = self.clone_handles();

            handles.push(tokio::spawn(async move {
                loop {
                    let task = {
                        let mut rx = task_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(task) = task else { break };

                    if cancellation.is_cancelled() {
                        debug!(task_id = %task.id, "skipping task, cancellation requested");
                        break;
                    }

                    let result = pool
                        .run_one(worker_id, task, batch_index, batch_total, &cancellation)
                        .await;
                    if result_tx.send(result).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        let mut results = Vec::with_capacity(batch_len);
        while results.len() < batch_len {
            match result_rx.recv().await {
                Some(result) => results.push(result),
                None => break,
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        results
    }

    fn clone_handles(&self) -> WorkerHandles {
        WorkerHandles {
            runner: Arc::clone(&self.runner),
            task_store: Arc::clone(&self.task_store),
            workspace_manager: Arc::clone(&self.workspace_manager),
            vcs: Arc::clone(&self.vcs),
            analyzer: self.analyzer,
            clock: Arc::clone(&self.clock),
            running: Arc::clone(&self.running),
            on_progress: self.on_progress.clone(),
            config: self.config.clone(),
        }
    }

}

/// Per-worker clone of shared dependencies; lighter than cloning
/// `WorkerPool` itself since `running`/`on_progress` stay shared.
struct WorkerHandles {
    runner: Arc<dyn AgentRunner>,
    task_store: Arc<dyn TaskStore>,
    workspace_manager: Arc<WorkspaceManager>,
    vcs: Arc<dyn VersionControl>,
    analyzer: ResponseAnalyzer,
    clock: Arc<dyn Clock>,
    running: Arc<AtomicUsize>,
    on_progress: Option<ProgressCallback>,
    config: WorkerPoolConfig,
}

impl WorkerHandles {
    fn emit(&self, worker_id: usize, task: &Task, status: ProgressStatus, batch_index: usize, batch_total: usize) {
        if let Some(cb) = &self.on_progress {
            cb(ProgressEvent {
                worker_id,
                task_id: task.id.clone(),
                task_name: task.name.clone(),
                status,
                batch_index,
                batch_total,
            });
        }
    }

    async fn run_one(
        &self,
        worker_id: usize,
        task: Task,
        batch_index: usize,
        batch_total: usize,
        cancellation: &CancellationToken,
    ) -> TaskResult {
        self.running.fetch_add(1, Ordering::SeqCst);
        self.emit(worker_id, &task, ProgressStatus::Started, batch_index, batch_total);
        let started_at = self.clock.now();

        let outcome = self
            .attempt_with_retries(worker_id, &task, batch_index, batch_total, cancellation)
            .await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        let finished_at = self.clock.now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        match outcome {
            Ok((output, branch)) => {
                self.emit(worker_id, &task, ProgressStatus::Completed, batch_index, batch_total);
                TaskResult {
                    task_id: task.id,
                    success: true,
                    output,
                    error: None,
                    duration_ms,
                    started_at,
                    finished_at,
                    worker_id,
                    branch,
                }
            }
            Err(message) => {
                self.emit(worker_id, &task, ProgressStatus::Failed, batch_index, batch_total);
                TaskResult {
                    task_id: task.id,
                    success: false,
                    output: String::new(),
                    error: Some(message),
                    duration_ms,
                    started_at,
                    finished_at,
                    worker_id,
                    branch: None,
                }
            }
        }
    }

    /// Implements spec §4.2's attempt loop (`a = 1..R`).
    async fn attempt_with_retries(
        &self,
        worker_id: usize,
        task: &Task,
        batch_index: usize,
        batch_total: usize,
        cancellation: &CancellationToken,
    ) -> std::result::Result<(String, Option<String>), String> {
        let max_retries = self.config.max_retries;

        // Total attempts = max_retries + 1 (attempt 0 is the first try, not
        // a retry); max_retries = 0 still means the task gets exactly one
        // attempt, never zero.
        for attempt in 0..=max_retries {
            if cancellation.is_cancelled() {
                return Err("cancelled".to_string());
            }

            if let Err(e) = self.task_store.set_status(&task.id, Status::InProgress).await {
                return Err(format!("failed to set IN_PROGRESS: {e}"));
            }

            let workspace = if self.config.isolate_workspaces {
                match self.workspace_manager.setup(&task.id, &task.name).await {
                    Ok(ws) => Some(ws),
                    Err(e) => return Err(format!("workspace setup failed: {e}")),
                }
            } else {
                None
            };
            let work_dir = workspace
                .as_ref()
                .map(|w| w.work_path.clone())
                .unwrap_or_else(|| self.workspace_manager.base_path().to_path_buf());

            let prompt = build_prompt(task);
            let opts = AgentOptions {
                prompt,
                work_dir,
                allowed_tools: self.config.allowed_tools.clone(),
                max_turns: None,
                system_prompt: None,
                timeout_seconds: self.config.agent_timeout_seconds,
                stream_output: self.config.stream_output,
            };

            let result = self.runner.execute(opts, cancellation).await;

            let text_result = match result {
                Ok(r) => r,
                Err(HermesError::Cancelled) => {
                    return Err("cancelled".to_string());
                }
                Err(e) => {
                    warn!(task_id = %task.id, attempt, error = %e, "agent execution failed");
                    if attempt < max_retries {
                        self.emit(worker_id, task, ProgressStatus::Retrying, batch_index, batch_total);
                        self.clock.sleep(self.config.retry_delay).await;
                        continue;
                    }
                    return Err(e.to_string());
                }
            };

            let analysis = self
                .analyzer
                .analyze(&text_result.text, &text_result.events, &task.success_criteria);

            match analysis.kind {
                AnalysisKind::Complete => {
                    if let Some(ws) = &workspace {
                        if self
                            .workspace_manager
                            .has_uncommitted_changes(ws)
                            .await
                            .unwrap_or(false)
                        {
                            let message = crate::vcs::task_commit_message(&task.id.to_string(), &task.name);
                            if let Err(e) = self.workspace_manager.commit_changes(ws, &message).await {
                                warn!(task_id = %task.id, error = %e, "failed to commit task workspace");
                            }
                        }
                    }
                    let _ = self.task_store.set_status(&task.id, Status::Completed).await;
                    return Ok((text_result.text, workspace.map(|w| w.branch)));
                }
                AnalysisKind::Blocked => {
                    let _ = self.task_store.set_status(&task.id, Status::Blocked).await;
                    return Err("blocked".to_string());
                }
                AnalysisKind::Paused => {
                    let _ = self.task_store.set_status(&task.id, Status::Paused).await;
                    return Err("paused".to_string());
                }
                _ => {
                    if attempt < max_retries {
                        self.emit(worker_id, task, ProgressStatus::Retrying, batch_index, batch_total);
                        self.clock.sleep(self.config.retry_delay).await;
                    } else {
                        return Err(format!(
                            "exhausted {} attempt(s) without reaching COMPLETE",
                            max_retries + 1
                        ));
                    }
                }
            }
        }

        Err("exhausted retries".to_string())
    }
}

fn build_prompt(task: &Task) -> String {
    let mut prompt = format!("Task {}: {}\n", task.id, task.name);
    if !task.success_criteria.is_empty() {
        prompt.push_str("\nSuccess criteria:\n");
        for c in &task.success_criteria {
            prompt.push_str(&format!("- {c}\n"));
        }
    }
    if !task.files_to_touch.is_empty() {
        prompt.push_str("\nFiles to touch:\n");
        for f in &task.files_to_touch {
            prompt.push_str(&format!("- {f}\n"));
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runner::mock::MockAgentRunner;
    use crate::clock::TestClock;
    use crate::models::AgentEvent;
    use crate::task_store::InMemoryTaskStore;
    use crate::vcs::git_cli::GitCliAdapter;

    fn completed_event() -> Vec<AgentEvent> {
        vec![AgentEvent::Text {
            content: "---HERMES_STATUS---\nSTATUS: COMPLETE\n---END_HERMES_STATUS---".to_string(),
        }]
    }

    fn pool_with_runner(runner: Arc<dyn AgentRunner>, dir: &std::path::Path) -> WorkerPool {
        let task_store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new(vec![]));
        let vcs: Arc<dyn VersionControl> = Arc::new(GitCliAdapter::new());
        let workspace_manager = Arc::new(WorkspaceManager::new(
            Arc::clone(&vcs),
            dir.to_path_buf(),
            false,
        ));
        let clock = Arc::new(TestClock::new());
        WorkerPool::new(
            WorkerPoolConfig {
                worker_count: 2,
                isolate_workspaces: false,
                max_retries: 2,
                retry_delay: Duration::from_millis(1),
                agent_timeout_seconds: 5,
                stream_output: false,
                allowed_tools: vec![],
            },
            runner,
            task_store,
            workspace_manager,
            vcs,
            clock,
            None,
        )
    }

    #[tokio::test]
    async fn completed_task_reports_success() {
        let dir = tempfile::tempdir().unwrap();
        let runner: Arc<dyn AgentRunner> = Arc::new(MockAgentRunner::single(completed_event()));
        let pool = pool_with_runner(runner, dir.path());
        let task = Task::new("T1", "Do the thing", "F1");

        let results = pool
            .run_batch(vec![task], 0, 1, CancellationToken::new())
            .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].success);
    }

    #[tokio::test]
    async fn unresolved_status_retries_then_fails() {
        let dir = tempfile::tempdir().unwrap();
        let runner: Arc<dyn AgentRunner> = Arc::new(MockAgentRunner::single(vec![AgentEvent::Text {
            content: "still working on it".to_string(),
        }]));
        let pool = pool_with_runner(runner, dir.path());
        let task = Task::new("T1", "Do the thing", "F1");

        let results = pool
            .run_batch(vec![task], 0, 1, CancellationToken::new())
            .await;

        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
    }

    #[tokio::test]
    async fn blocked_status_fails_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockAgentRunner::single(vec![AgentEvent::Text {
            content: "---HERMES_STATUS---\nSTATUS: BLOCKED\n---END_HERMES_STATUS---".to_string(),
        }]));
        let runner_dyn: Arc<dyn AgentRunner> = runner.clone();
        let pool = pool_with_runner(runner_dyn, dir.path());
        let task = Task::new("T1", "Do the thing", "F1");

        let results = pool
            .run_batch(vec![task], 0, 1, CancellationToken::new())
            .await;

        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn retries_on_unknown_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockAgentRunner::new(vec![
            vec![AgentEvent::Text {
                content: "still working on it".to_string(),
            }],
            completed_event(),
        ]));
        let runner_dyn: Arc<dyn AgentRunner> = runner.clone();
        let pool = pool_with_runner(runner_dyn, dir.path());
        let task = Task::new("T1", "Do the thing", "F1");

        let results = pool
            .run_batch(vec![task], 0, 1, CancellationToken::new())
            .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(runner.call_count(), 2);
    }

    /// Tracks how many `execute` calls are in flight at once, recording the
    /// high-water mark, to verify the pool never exceeds `worker_count`
    /// concurrent agent invocations for one batch (spec §8 scenario 2).
    struct ConcurrencyTrackingRunner {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ConcurrencyTrackingRunner {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl AgentRunner for ConcurrencyTrackingRunner {
        async fn execute(
            &self,
            _opts: crate::agent_runner::AgentOptions,
            cancellation: &CancellationToken,
        ) -> Result<crate::agent_runner::TextResult> {
            if cancellation.is_cancelled() {
                return Err(HermesError::Cancelled);
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(crate::agent_runner::collect_text_result(completed_event()))
        }

        async fn execute_stream(
            &self,
            opts: crate::agent_runner::AgentOptions,
            cancellation: &CancellationToken,
        ) -> Result<tokio::sync::mpsc::Receiver<AgentEvent>> {
            let result = self.execute(opts, cancellation).await?;
            let (tx, rx) = tokio::sync::mpsc::channel(result.events.len().max(1));
            for event in result.events {
                let _ = tx.send(event).await;
            }
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn batch_never_exceeds_configured_worker_count() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ConcurrencyTrackingRunner::new());
        let runner_dyn: Arc<dyn AgentRunner> = runner.clone();
        let mut pool = pool_with_runner(runner_dyn, dir.path());
        pool.config.worker_count = 3;

        let tasks: Vec<Task> = (1..=5)
            .map(|n| Task::new(format!("T00{n}"), format!("Task {n}"), "F1"))
            .collect();

        let results = pool.run_batch(tasks, 0, 1, CancellationToken::new()).await;

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.success));
        assert!(runner.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn cancellation_completes_workers_without_hanging() {
        let dir = tempfile::tempdir().unwrap();
        let runner: Arc<dyn AgentRunner> = Arc::new(MockAgentRunner::single(completed_event()));
        let pool = pool_with_runner(runner, dir.path());
        let tasks = vec![
            Task::new("T1", "First", "F1"),
            Task::new("T2", "Second", "F1"),
        ];
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let results = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            pool.run_batch(tasks, 0, 1, cancellation),
        )
        .await
        .expect("cancelled batch must complete within the timeout");

        assert!(results.len() <= 2);
    }
}
