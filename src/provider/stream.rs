//! Streaming subprocess executor shared by the CLI-backed providers.
//!
//! The prompt is written to the child's stdin, which is then closed. Stdout
//! is split into lines and fed to a backend-specific [`StreamParser`]; the
//! resulting [`StreamEvent`]s drive the accumulated text, the transcript
//! chunks handed to the caller, and the tool activity log.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::provider::transcript::{self, truncate_chars};
use crate::provider::{ChunkCallback, ToolActivity};

/// Stderr kept for error reporting; older output is discarded.
const MAX_STDERR_BYTES: usize = 64 * 1024;

const MAX_TOOL_OUTPUT_CHARS: usize = 200;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("exited with {}: {}", exit_label(*.code), stderr_label(.stderr))]
    Failed { code: Option<i32>, stderr: String },

    #[error("cancelled")]
    Cancelled,
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

fn stderr_label(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        "no output".to_string()
    } else {
        truncate_chars(trimmed, 500)
    }
}

/// A normalised event decoded from one line of agent output.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ToolStarted {
        id: Option<String>,
        name: String,
        input: Value,
    },
    ToolFinished {
        id: Option<String>,
        output: Option<String>,
        exit_code: Option<i32>,
        is_error: bool,
    },
    /// The agent's final answer. Authoritative over accumulated deltas.
    FinalResult { text: String, is_error: bool },
    /// An error the agent reported. Fatal errors fail the completion.
    Error { message: String, fatal: bool },
}

/// Decodes one backend's line format. Must never panic on malformed input.
pub trait StreamParser: Send {
    fn parse_line(&mut self, line: &str) -> Vec<StreamEvent>;
}

/// Splits a byte stream into lines, holding back an incomplete tail.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            lines.push(decode_line(&line[..line.len() - 1]));
        }
        lines
    }

    /// Flush whatever remains after EOF.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = decode_line(&self.pending);
        self.pending.clear();
        Some(line)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Fixed deadline measured from spawn.
    WallClock(Duration),
    /// Deadline pushed back by every read from stdout or stderr.
    Inactivity(Duration),
}

impl TimeoutPolicy {
    pub fn duration(&self) -> Duration {
        match self {
            TimeoutPolicy::WallClock(d) | TimeoutPolicy::Inactivity(d) => *d,
        }
    }
}

/// Cooperative cancellation flag shared between a provider and its caller.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the handle is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: String,
    pub timeout: TimeoutPolicy,
    pub kill_grace: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOutcome {
    pub content: String,
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub tools: Vec<ToolActivity>,
    pub errors: Vec<String>,
    /// The agent itself reported failure.
    pub failed: bool,
}

/// Folds stream events into the outcome and the caller-visible chunks.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    outcome: StreamOutcome,
    open_tools: Vec<(Option<String>, usize, Instant)>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self) -> &str {
        &self.outcome.content
    }

    pub fn apply(&mut self, event: StreamEvent, emit: &mut dyn FnMut(&str)) {
        match event {
            StreamEvent::TextDelta(text) => {
                if !text.is_empty() {
                    self.outcome.content.push_str(&text);
                    emit(&text);
                }
            }
            StreamEvent::ToolStarted { id, name, input } => {
                emit(&format!("\n{}\n", transcript::tool_started(&name, &input)));
                self.open_tools
                    .push((id, self.outcome.tools.len(), Instant::now()));
                self.outcome.tools.push(ToolActivity {
                    name,
                    input,
                    output_summary: None,
                    exit_code: None,
                    is_error: false,
                    duration: Duration::ZERO,
                });
            }
            StreamEvent::ToolFinished {
                id,
                output,
                exit_code,
                is_error,
            } => {
                let slot = match &id {
                    Some(id) => self
                        .open_tools
                        .iter()
                        .rposition(|(open, _, _)| open.as_deref() == Some(id.as_str())),
                    None => self.open_tools.len().checked_sub(1),
                };
                let Some(slot) = slot else {
                    debug!(?id, "tool result without a matching start");
                    return;
                };
                let (_, index, started) = self.open_tools.remove(slot);
                let tool = &mut self.outcome.tools[index];
                tool.output_summary = output
                    .map(|o| truncate_chars(o.trim(), MAX_TOOL_OUTPUT_CHARS))
                    .filter(|o| !o.is_empty());
                tool.exit_code = exit_code;
                tool.is_error = is_error;
                tool.duration = started.elapsed();
                emit(&format!("{}\n", transcript::tool_finished(&tool.name, is_error)));
            }
            StreamEvent::FinalResult { text, is_error } => {
                self.outcome.failed |= is_error;
                if text.is_empty() {
                    return;
                }
                match text.strip_prefix(self.outcome.content.as_str()) {
                    Some(missing) => {
                        if !missing.is_empty() {
                            emit(missing);
                        }
                    }
                    // Diverged from what was streamed; the final text wins.
                    None if self.outcome.content.is_empty() => emit(&text),
                    None => {}
                }
                self.outcome.content = text;
            }
            StreamEvent::Error { message, fatal } => {
                self.outcome.failed |= fatal;
                self.outcome.errors.push(message);
            }
        }
    }

    pub fn into_outcome(self) -> StreamOutcome {
        self.outcome
    }
}

enum Wake {
    Stdout(io::Result<usize>),
    Stderr(io::Result<usize>),
    Cancelled,
    TimedOut,
}

enum Exit {
    Status(io::Result<ExitStatus>),
    Cancelled,
    TimedOut,
}

/// Run the request to completion, streaming chunks to `on_chunk`.
pub async fn run_stream(
    request: StreamRequest,
    parser: &mut dyn StreamParser,
    on_chunk: Option<&ChunkCallback>,
    cancel: &CancelHandle,
) -> Result<StreamOutcome, StreamError> {
    let mut command = Command::new(&request.program);
    command
        .args(&request.args)
        .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &request.cwd {
        command.current_dir(cwd);
    }

    let mut child = command.spawn().map_err(|source| StreamError::Spawn {
        program: request.program.clone(),
        source,
    })?;
    debug!(program = %request.program, pid = ?child.id(), "agent process started");

    // Written from a separate task so a large prompt cannot deadlock against
    // a child that fills its stdout pipe before reading stdin.
    if let Some(mut stdin) = child.stdin.take() {
        let prompt = request.stdin;
        tokio::spawn(async move {
            if let Err(err) = stdin.write_all(prompt.as_bytes()).await {
                debug!(error = %err, "failed to write prompt to agent stdin");
            }
            let _ = stdin.shutdown().await;
        });
    }

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr not captured"))?;

    let timeout = request.timeout;
    let mut deadline = tokio::time::Instant::now() + timeout.duration();
    let mut emit = |text: &str| {
        if let Some(callback) = on_chunk {
            callback(text);
        }
    };

    let mut lines = LineBuffer::new();
    let mut acc = StreamAccumulator::new();
    let mut stderr_bytes: Vec<u8> = Vec::new();
    let mut out_buf = [0u8; 8192];
    let mut err_buf = [0u8; 4096];
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        let wake = tokio::select! {
            read = stdout.read(&mut out_buf), if stdout_open => Wake::Stdout(read),
            read = stderr.read(&mut err_buf), if stderr_open => Wake::Stderr(read),
            _ = cancel.cancelled() => Wake::Cancelled,
            _ = tokio::time::sleep_until(deadline) => Wake::TimedOut,
        };

        match wake {
            Wake::Stdout(Ok(0)) => {
                stdout_open = false;
                if let Some(line) = lines.finish() {
                    feed_line(parser, &mut acc, &line, &mut emit);
                }
            }
            Wake::Stdout(Ok(n)) => {
                if let TimeoutPolicy::Inactivity(d) = timeout {
                    deadline = tokio::time::Instant::now() + d;
                }
                for line in lines.push(&out_buf[..n]) {
                    feed_line(parser, &mut acc, &line, &mut emit);
                }
            }
            Wake::Stdout(Err(err)) => {
                warn!(error = %err, "failed reading agent stdout");
                stdout_open = false;
            }
            Wake::Stderr(Ok(0)) => stderr_open = false,
            Wake::Stderr(Ok(n)) => {
                if let TimeoutPolicy::Inactivity(d) = timeout {
                    deadline = tokio::time::Instant::now() + d;
                }
                stderr_bytes.extend_from_slice(&err_buf[..n]);
                if stderr_bytes.len() > MAX_STDERR_BYTES {
                    let excess = stderr_bytes.len() - MAX_STDERR_BYTES;
                    stderr_bytes.drain(..excess);
                }
            }
            Wake::Stderr(Err(err)) => {
                debug!(error = %err, "failed reading agent stderr");
                stderr_open = false;
            }
            Wake::Cancelled => {
                terminate(&mut child, request.kill_grace).await;
                return Err(StreamError::Cancelled);
            }
            Wake::TimedOut => {
                warn!(program = %request.program, timeout_secs = timeout.duration().as_secs(), "agent timed out");
                terminate(&mut child, request.kill_grace).await;
                return Err(StreamError::Timeout(timeout.duration()));
            }
        }
    }

    let exit = tokio::select! {
        status = child.wait() => Exit::Status(status),
        _ = cancel.cancelled() => Exit::Cancelled,
        _ = tokio::time::sleep_until(deadline) => Exit::TimedOut,
    };
    let status = match exit {
        Exit::Status(status) => status?,
        Exit::Cancelled => {
            terminate(&mut child, request.kill_grace).await;
            return Err(StreamError::Cancelled);
        }
        Exit::TimedOut => {
            terminate(&mut child, request.kill_grace).await;
            return Err(StreamError::Timeout(timeout.duration()));
        }
    };

    if cancel.is_cancelled() {
        return Err(StreamError::Cancelled);
    }

    let stderr_text = String::from_utf8_lossy(&stderr_bytes).into_owned();
    let mut outcome = acc.into_outcome();
    outcome.exit_code = status.code();
    debug!(code = ?outcome.exit_code, chars = outcome.content.len(), "agent process exited");

    if status.success() || !outcome.content.is_empty() {
        outcome.stderr = stderr_text;
        Ok(outcome)
    } else {
        Err(StreamError::Failed {
            code: status.code(),
            stderr: stderr_text,
        })
    }
}

fn feed_line(
    parser: &mut dyn StreamParser,
    acc: &mut StreamAccumulator,
    line: &str,
    emit: &mut dyn FnMut(&str),
) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    debug!(line, "agent output");
    for event in parser.parse_line(line) {
        acc.apply(event, emit);
    }
}

/// Stop the child: SIGTERM and a grace period on Unix, then a hard kill.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                && tokio::time::timeout(grace, child.wait()).await.is_ok()
            {
                return;
            }
        }
    }

    #[cfg(windows)]
    {
        let _ = grace;
        if let Some(pid) = child.id() {
            let pid = pid.to_string();
            let killed = Command::new("taskkill")
                .args(["/PID", pid.as_str(), "/T", "/F"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if matches!(killed, Ok(status) if status.success()) {
                let _ = child.wait().await;
                return;
            }
        }
    }

    if let Err(err) = child.kill().await {
        debug!(error = %err, "agent process already gone");
    }
}
