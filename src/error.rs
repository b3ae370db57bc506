use thiserror::Error;

/// Convenience type alias for Results with HermesError
pub type Result<T> = std::result::Result<T, HermesError>;

/// Main error type for the Hermes orchestration core.
///
/// Variants map onto the error taxonomy of the design: UserInputError and
/// ResourceError abort a run, AgentError/ClassificationError are retryable
/// inside a worker, MergeConflict/CircuitOpen/Cancelled are reported but
/// never panic the pool.
#[derive(Error, Debug)]
pub enum HermesError {
    #[error("unknown dependency: task {task} depends on undefined task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("task {0} depends on itself")]
    SelfDependency(String),

    #[error("duplicate task id: {0}")]
    DuplicateTaskId(String),

    #[error("invalid run-state transition for task {task}: {from} -> {to}")]
    InvalidTransition {
        task: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("task not found in graph: {0}")]
    TaskNotFound(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("agent error: {message}")]
    Agent { message: String },

    #[error("agent timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("merge conflict on branch {branch} (task {task})")]
    MergeConflict { branch: String, task: String },

    #[error("circuit breaker is open: {reason}")]
    CircuitOpen { reason: String },

    #[error("cancelled")]
    Cancelled,

    #[error("version control error: {message}")]
    VersionControl { message: String },

    #[error("workspace error: {message}")]
    Workspace { message: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl HermesError {
    /// True for errors that abort the entire scheduler run rather than just
    /// the task or batch in which they occurred (§7: UserInputError,
    /// ResourceError marked global, CircuitOpen, Cancelled under fail-fast).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HermesError::UnknownDependency { .. }
                | HermesError::CycleDetected(_)
                | HermesError::SelfDependency(_)
                | HermesError::DuplicateTaskId(_)
                | HermesError::Configuration(_)
                | HermesError::CircuitOpen { .. }
                | HermesError::Cancelled
        )
    }
}
