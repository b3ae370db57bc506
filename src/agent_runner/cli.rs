//! Subprocess adapter for [`AgentRunner`], generalizing the Claude Code CLI
//! integration pattern: spawn a binary, write the prompt to stdin, and
//! parse newline-delimited JSON events from stdout.

use super::{collect_text_result, AgentOptions, AgentRunner, TextResult};
use crate::cancellation::CancellationToken;
use crate::error::{HermesError, Result};
use crate::models::AgentEvent;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Candidate install locations searched when no explicit binary path is
/// configured, in order.
const DEFAULT_BINARY_CANDIDATES: &[&str] = &[
    "claude",
    "/usr/local/bin/claude",
    "/home/vscode/.local/bin/claude",
];

#[derive(Debug, Clone)]
pub struct CliAgentRunner {
    binary: String,
}

impl CliAgentRunner {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Searches [`DEFAULT_BINARY_CANDIDATES`] for a working agent binary.
    pub async fn discover() -> Result<Self> {
        for candidate in DEFAULT_BINARY_CANDIDATES {
            match Command::new(candidate).arg("--help").output().await {
                Ok(output) if output.status.success() => {
                    debug!(binary = candidate, "found agent binary");
                    return Ok(Self::new(*candidate));
                }
                Ok(_) => debug!(binary = candidate, "binary present but --help failed"),
                Err(_) => debug!(binary = candidate, "binary not found"),
            }
        }
        Err(HermesError::Configuration(
            "no agent binary found on any candidate path".to_string(),
        ))
    }

    fn build_command(&self, opts: &AgentOptions) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .args(["--print", "--output-format", "stream-json"])
            .current_dir(&opts.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if !opts.allowed_tools.is_empty() {
            command.args(["--allowedTools", &opts.allowed_tools.join(",")]);
        }
        if let Some(max_turns) = opts.max_turns {
            command.args(["--max-turns", &max_turns.to_string()]);
        }
        if let Some(system_prompt) = &opts.system_prompt {
            command.args(["--system-prompt", system_prompt]);
        }
        command
    }
}

#[async_trait]
impl AgentRunner for CliAgentRunner {
    async fn execute(&self, opts: AgentOptions, cancellation: &CancellationToken) -> Result<TextResult> {
        let timeout = std::time::Duration::from_secs(opts.timeout_seconds);

        // A call-scoped token that fires on whichever comes first: the
        // caller cancelling, or this call's own timeout elapsing. Both
        // paths funnel through `execute_stream`'s single kill mechanism so
        // the subprocess never outlives either deadline.
        let local = CancellationToken::new();
        let caller = cancellation.clone();
        let watcher_local = local.clone();
        let watcher = tokio::spawn(async move {
            tokio::select! {
                _ = caller.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {}
            }
            watcher_local.cancel();
        });

        let mut rx = self.execute_stream(opts, &local).await?;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        watcher.abort();

        if local.is_cancelled() {
            return Err(if cancellation.is_cancelled() {
                HermesError::Cancelled
            } else {
                HermesError::Timeout {
                    seconds: timeout.as_secs(),
                }
            });
        }

        Ok(collect_text_result(events))
    }

    async fn execute_stream(
        &self,
        opts: AgentOptions,
        cancellation: &CancellationToken,
    ) -> Result<mpsc::Receiver<AgentEvent>> {
        let mut command = self.build_command(&opts);
        let prompt = opts.prompt.clone();

        let mut child = command.spawn().map_err(|e| HermesError::Agent {
            message: format!("failed to spawn agent process: {e}"),
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| HermesError::Agent {
                    message: format!("failed to write prompt to agent stdin: {e}"),
                })?;
            stdin.flush().await.map_err(|e| HermesError::Agent {
                message: format!("failed to flush agent stdin: {e}"),
            })?;
        }

        let stdout = child.stdout.take().ok_or_else(|| HermesError::Agent {
            message: "agent process had no stdout pipe".to_string(),
        })?;

        let (tx, rx) = mpsc::channel(64);
        let cancellation = cancellation.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                if line.trim().is_empty() {
                                    continue;
                                }
                                match serde_json::from_str::<AgentEvent>(&line) {
                                    Ok(event) => {
                                        if tx.send(event).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        warn!(error = %e, line, "failed to parse agent event line");
                                    }
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                warn!(error = %e, "error reading agent stdout");
                                break;
                            }
                        }
                    }
                    _ = cancellation.cancelled() => {
                        debug!("agent invocation cancelled or timed out, killing subprocess");
                        if let Err(e) = child.kill().await {
                            warn!(error = %e, "failed to kill agent process");
                        }
                        break;
                    }
                }
            }

            if let Err(e) = child.wait().await {
                warn!(error = %e, "agent process wait failed");
            }
        });

        Ok(rx)
    }
}
