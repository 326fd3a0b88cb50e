//! Agent subprocess runner
//!
//! One invocation is one blocking subprocess run with a hard timeout.
//! Output streams are read by dedicated tasks into bounded tails so a
//! runaway agent cannot exhaust memory; stdout lines are mirrored into the
//! structured log as they arrive.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::config::AgentConfig;
use crate::types::TaskId;

/// Errors launching or supervising the agent subprocess
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    /// The configured command could not be started
    #[error("Failed to launch agent: {0}")]
    Spawn(String),

    /// The subprocess failed while being supervised
    #[error("Agent I/O error: {0}")]
    Io(String),
}

/// One agent invocation: the instruction payload plus execution limits.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub task_id: TaskId,
    pub prompt: String,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
}

/// Captured outcome of one agent run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Process exit code; `None` when the process died to a signal
    /// (including our own timeout kill).
    pub exit_code: Option<i32>,
    /// Tail of stdout, capped at the configured byte budget.
    pub stdout: String,
    /// Tail of stderr, capped likewise.
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl AgentOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Failure description for the task's error record: stderr when present,
    /// otherwise what little the exit status tells us.
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.exit_code {
            Some(code) => format!("agent exited with code {code} and no stderr output"),
            None => "agent terminated without an exit code".to_string(),
        }
    }
}

/// Seam between the coordinator and the external agent. Tests substitute
/// scripted implementations.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, invocation: AgentInvocation) -> Result<AgentOutcome, AgentError>;
}

/// Production runner: launches the configured agent command.
pub struct ProcessAgentRunner {
    config: AgentConfig,
}

impl ProcessAgentRunner {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AgentRunner for ProcessAgentRunner {
    async fn run(&self, invocation: AgentInvocation) -> Result<AgentOutcome, AgentError> {
        let started = Instant::now();

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|error| AgentError::Spawn(format!("{}: {error}", self.config.command)))?;

        // Feed the payload from its own task so a large prompt cannot
        // deadlock against a child that is already writing output.
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = invocation.prompt.clone();
            tokio::spawn(async move {
                if let Err(error) = stdin.write_all(prompt.as_bytes()).await {
                    tracing::debug!(%error, "agent stdin closed early");
                }
                if let Err(error) = stdin.shutdown().await {
                    tracing::debug!(%error, "agent stdin shutdown failed");
                }
            });
        }

        let limit = self.config.max_output_bytes;
        let stdout_handle = child.stdout.take().map(|stdout| {
            let task_id = invocation.task_id.clone();
            tokio::spawn(async move { read_stream(stdout, limit, Some(task_id)).await })
        });
        let stderr_handle = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(async move { read_stream(stderr, limit, None).await }));

        let (exit_code, timed_out) =
            match tokio::time::timeout(invocation.timeout, child.wait()).await {
                Ok(Ok(status)) => (status.code(), false),
                Ok(Err(error)) => return Err(AgentError::Io(error.to_string())),
                Err(_) => {
                    tracing::warn!(
                        task_id = %invocation.task_id,
                        timeout_secs = invocation.timeout.as_secs(),
                        "agent run exceeded its budget, killing"
                    );
                    if let Err(error) = child.kill().await {
                        tracing::warn!(%error, "failed to kill timed-out agent");
                    }
                    (None, true)
                }
            };

        // Readers finish once the pipes hit EOF (the kill closes them).
        let stdout = collect_stream(stdout_handle).await;
        let stderr = collect_stream(stderr_handle).await;

        Ok(AgentOutcome {
            exit_code,
            stdout,
            stderr,
            timed_out,
            duration: started.elapsed(),
        })
    }
}

/// Read a stream line by line, keeping a bounded tail. When `log_as` is set
/// the lines are also mirrored to the log (agent stdout observability).
async fn read_stream<R>(reader: R, limit: usize, log_as: Option<TaskId>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut tail: VecDeque<String> = VecDeque::new();
    let mut bytes = 0usize;

    while let Ok(Some(mut line)) = lines.next_line().await {
        if let Some(task_id) = &log_as {
            tracing::info!(task_id = %task_id, "{line}");
        }
        truncate_to_bytes(&mut line, limit);
        bytes += line.len() + 1;
        tail.push_back(line);
        while bytes > limit && tail.len() > 1 {
            if let Some(dropped) = tail.pop_front() {
                bytes -= dropped.len() + 1;
            }
        }
    }

    let lines: Vec<String> = tail.into();
    lines.join("\n")
}

fn truncate_to_bytes(line: &mut String, limit: usize) {
    if line.len() <= limit {
        return;
    }
    let mut cut = limit;
    while cut > 0 && !line.is_char_boundary(cut) {
        cut -= 1;
    }
    line.truncate(cut);
}

async fn collect_stream(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}
