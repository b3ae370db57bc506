//! In-memory [`AgentRunner`] for tests: returns a scripted sequence of
//! events without spawning a process.

use super::{collect_text_result, AgentOptions, AgentRunner, TextResult};
use crate::cancellation::CancellationToken;
use crate::error::{HermesError, Result};
use crate::models::AgentEvent;
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Replays one canned response per call, in order given to
/// [`MockAgentRunner::new`]. Calls past the end repeat the last script.
pub struct MockAgentRunner {
    scripts: Mutex<Vec<Vec<AgentEvent>>>,
    calls: Mutex<Vec<AgentOptions>>,
}

impl MockAgentRunner {
    pub fn new(scripts: Vec<Vec<AgentEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Convenience constructor for a single scripted response reused for
    /// every call.
    pub fn single(events: Vec<AgentEvent>) -> Self {
        Self::new(vec![events])
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next_script(&self) -> Vec<AgentEvent> {
        let scripts = self.scripts.lock().unwrap();
        let index = self.calls.lock().unwrap().len().min(scripts.len().saturating_sub(1));
        scripts.get(index).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl AgentRunner for MockAgentRunner {
    async fn execute(&self, opts: AgentOptions, cancellation: &CancellationToken) -> Result<TextResult> {
        if cancellation.is_cancelled() {
            return Err(HermesError::Cancelled);
        }
        let events = self.next_script();
        self.calls.lock().unwrap().push(opts);
        Ok(collect_text_result(events))
    }

    async fn execute_stream(
        &self,
        opts: AgentOptions,
        cancellation: &CancellationToken,
    ) -> Result<mpsc::Receiver<AgentEvent>> {
        if cancellation.is_cancelled() {
            return Err(HermesError::Cancelled);
        }
        let events = self.next_script();
        self.calls.lock().unwrap().push(opts);
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            let _ = tx.send(event).await;
        }
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_scripted_events_in_order() {
        let runner = MockAgentRunner::new(vec![
            vec![AgentEvent::Text {
                content: "first".to_string(),
            }],
            vec![AgentEvent::Text {
                content: "second".to_string(),
            }],
        ]);

        let opts = AgentOptions {
            prompt: "do it".to_string(),
            work_dir: std::path::PathBuf::from("."),
            allowed_tools: vec![],
            max_turns: None,
            system_prompt: None,
            timeout_seconds: 1,
            stream_output: false,
        };

        let cancellation = CancellationToken::new();
        let first = runner.execute(opts.clone(), &cancellation).await.unwrap();
        assert_eq!(first.text, "first");
        let second = runner.execute(opts, &cancellation).await.unwrap();
        assert_eq!(second.text, "second");
        assert_eq!(runner.call_count(), 2);
    }
}
