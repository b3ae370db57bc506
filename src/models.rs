//! Shared data model for the orchestration core (spec §3).
//!
//! These types are produced by external collaborators (the Task Store, the
//! Agent Runner) or flow between the core's own components; the core never
//! mutates a [`Task`]'s structural fields, only its [`Status`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Identifier of a task, always `"T" + digits` (e.g. `T001`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() < 2 || !s.starts_with('T') || !s[1..].chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("not a valid task id: {s}"));
        }
        Ok(TaskId(s.to_string()))
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

/// Identifier of a feature, always `"F" + digits` (e.g. `F003`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureId(pub String);

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task priority label. Ordered `P1 > P2 > P3 > P4` (P1 most urgent) so the
/// batch planner can tie-break "ascending priority label" (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    P1,
    P2,
    P3,
    P4,
}

impl Priority {
    fn rank(self) -> u8 {
        match self {
            Priority::P1 => 0,
            Priority::P2 => 1,
            Priority::P3 => 2,
            Priority::P4 => 3,
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
            Priority::P4 => "P4",
        };
        write!(f, "{s}")
    }
}

/// Task lifecycle status, as tracked by the Task Store (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    NotStarted,
    InProgress,
    Completed,
    Blocked,
    AtRisk,
    Paused,
}

impl Status {
    /// `BLOCKED`/`PAUSED` remove a task from the eligible set for the
    /// current run; `AT_RISK` does not change eligibility.
    pub fn is_schedulable(self) -> bool {
        !matches!(self, Status::Blocked | Status::Paused)
    }
}

/// A unit of work enumerated by the Task Store. The core only ever writes
/// `status`; every other field is structural and owned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub feature_id: FeatureId,
    pub status: Status,
    pub priority: Priority,
    pub dependencies: HashSet<TaskId>,
    pub files_to_touch: Vec<String>,
    pub success_criteria: Vec<String>,
    pub estimated_effort: Option<String>,
    pub parallelizable: bool,
}

impl Task {
    /// Convenience constructor defaulting to `parallelizable = true`
    /// (spec §3: "parallelizable: bool (default true)").
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        feature_id: impl Into<String>,
    ) -> Self {
        Self {
            id: TaskId(id.into()),
            name: name.into(),
            feature_id: FeatureId(feature_id.into()),
            status: Status::NotStarted,
            priority: Priority::P3,
            dependencies: HashSet::new(),
            files_to_touch: Vec::new(),
            success_criteria: Vec::new(),
            estimated_effort: None,
            parallelizable: true,
        }
    }
}

/// Mutable per-node scheduling state tracked by the [`crate::graph`] module,
/// distinct from [`Status`] which the Task Store owns (spec §3: RunState).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Ready,
    Running,
    Done,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Ready => "READY",
            RunStatus::Running => "RUNNING",
            RunStatus::Done => "DONE",
            RunStatus::Failed => "FAILED",
        }
    }
}

/// Outcome of one worker's attempt(s) at a task (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub worker_id: usize,
    pub branch: Option<String>,
}

/// Normalized event emitted by an [`crate::agent_runner::AgentRunner`]
/// (spec §3: AgentEvent).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentEvent {
    System {
        model: String,
    },
    Text {
        content: String,
    },
    ToolUse {
        name: String,
        id: String,
        input: serde_json::Value,
    },
    ToolResult {
        id: String,
        output: String,
        is_error: bool,
        error: Option<String>,
    },
    Result {
        text: String,
        cost_usd: Option<f64>,
        duration_ms: u64,
    },
    Error {
        text: String,
    },
}

/// Classification kind produced by the Response Analyzer (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisKind {
    Complete,
    Blocked,
    Paused,
    AtRisk,
    InProgress,
    Unknown,
}

impl AnalysisKind {
    /// Parses the `STATUS:` value of a `HERMES_STATUS` block, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "COMPLETE" => Some(AnalysisKind::Complete),
            "BLOCKED" => Some(AnalysisKind::Blocked),
            "PAUSED" => Some(AnalysisKind::Paused),
            "AT_RISK" => Some(AnalysisKind::AtRisk),
            "IN_PROGRESS" => Some(AnalysisKind::InProgress),
            _ => None,
        }
    }
}

/// Verdict produced by the Response Analyzer for one agent execution
/// (spec §3: Analysis).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub kind: AnalysisKind,
    pub has_progress: bool,
    pub confidence: f64,
    pub criteria_met: usize,
    pub criteria_total: usize,
    pub recommendation: String,
}

/// An isolated per-task filesystem view layered on the VCS adapter
/// (spec §3: Workspace).
#[derive(Debug, Clone)]
pub struct Workspace {
    pub task_id: TaskId,
    pub branch: String,
    pub work_path: std::path::PathBuf,
    pub is_isolated: bool,
}

/// Worker Pool progress transition (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressStatus {
    Started,
    Retrying,
    Completed,
    Failed,
}

/// One progress notification emitted by a worker (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub worker_id: usize,
    pub task_id: TaskId,
    pub task_name: String,
    pub status: ProgressStatus,
    pub batch_index: usize,
    pub batch_total: usize,
}

/// Configured policy for how the scheduler reacts to a batch containing a
/// failed task (spec §4.3 / §6: `parallel.failureStrategy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureStrategy {
    FailFast,
    Continue,
}

/// Top-level result of one scheduler run (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub results: Vec<TaskResult>,
    pub total_time_ms: u64,
    pub successful: usize,
    pub failed: usize,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}
