//! Agent Runner: abstract interface over a subprocess-driven AI coding agent
//! (spec §4.3). The core depends only on the normalized [`AgentEvent`]
//! stream; concrete adapters are thin subprocess launchers.

pub mod cli;
pub mod mock;

use crate::cancellation::CancellationToken;
use crate::error::Result;
use crate::models::AgentEvent;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Parameters for one agent invocation (spec §4.3).
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub prompt: String,
    pub work_dir: std::path::PathBuf,
    pub allowed_tools: Vec<String>,
    pub max_turns: Option<u32>,
    pub system_prompt: Option<String>,
    pub timeout_seconds: u64,
    pub stream_output: bool,
}

/// Aggregated result of a non-streaming invocation.
#[derive(Debug, Clone)]
pub struct TextResult {
    pub text: String,
    pub events: Vec<AgentEvent>,
    pub cost_usd: Option<f64>,
    pub duration_ms: u64,
}

/// Polymorphism seam over whichever subprocess drives task execution
/// (spec §9: "Polymorphism over the Agent Runner"). A mock implementation
/// must be substitutable without recompiling the core.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// `cancellation` must be honored promptly: once cancelled, any
    /// subprocess backing this call is killed rather than left to run to
    /// completion or timeout (spec §5).
    async fn execute(&self, opts: AgentOptions, cancellation: &CancellationToken) -> Result<TextResult>;

    /// Streams normalized events as they arrive; the channel closes when
    /// the agent process exits, the timeout elapses, or `cancellation`
    /// fires (in which case the subprocess is killed).
    async fn execute_stream(
        &self,
        opts: AgentOptions,
        cancellation: &CancellationToken,
    ) -> Result<mpsc::Receiver<AgentEvent>>;
}

/// Collects a stream into a [`TextResult`], concatenating `Text` events and
/// pulling cost/duration from the terminal `Result` event if present.
pub(crate) fn collect_text_result(events: Vec<AgentEvent>) -> TextResult {
    let mut text = String::new();
    let mut cost_usd = None;
    let mut duration_ms = 0;

    for event in &events {
        match event {
            AgentEvent::Text { content } => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(content);
            }
            AgentEvent::Result {
                text: result_text,
                cost_usd: cost,
                duration_ms: duration,
            } => {
                if !result_text.is_empty() {
                    text = result_text.clone();
                }
                cost_usd = *cost;
                duration_ms = *duration;
            }
            _ => {}
        }
    }

    TextResult {
        text,
        events,
        cost_usd,
        duration_ms,
    }
}
