//! Agent provider abstraction.
//!
//! A provider turns a conversation into a completion. The bundled providers
//! all wrap a coding-agent CLI run as a streaming subprocess; see
//! [`cli::CliProvider`].

pub mod claude;
pub mod cli;
pub mod codex;
pub mod opencode;
pub mod stream;
pub mod tool_calls;
pub mod transcript;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::timeout::TimeoutConfig;

pub use cli::{CliBackend, CliProvider};
pub use stream::CancelHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A tool the caller offers to the model via free-text tool calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

/// A tool call recovered from the model's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// A tool invocation the agent CLI performed on its own while running.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolActivity {
    pub name: String,
    pub input: Value,
    pub output_summary: Option<String>,
    pub exit_code: Option<i32>,
    pub is_error: bool,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    Error,
}

/// Whether a human is driving the run or the engine is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Manual,
    #[default]
    Autonomous,
}

pub type ChunkCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    /// Invoked synchronously, in order, for every piece of streamed output.
    pub on_chunk: Option<ChunkCallback>,
    pub mode: ExecutionMode,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_chunk_callback(mut self, callback: ChunkCallback) -> Self {
        self.on_chunk = Some(callback);
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }
}

impl fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("messages", &self.messages)
            .field("tools", &self.tools)
            .field("on_chunk", &self.on_chunk.is_some())
            .field("mode", &self.mode)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub content: String,
    /// Streamed output when `content` has been replaced by an error message.
    pub raw_content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_activity: Vec<ToolActivity>,
    pub finish_reason: FinishReason,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            raw_content: None,
            tool_calls: Vec::new(),
            tool_activity: Vec::new(),
            finish_reason: FinishReason::Stop,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            finish_reason: FinishReason::Error,
            ..Self::text(message)
        }
    }

    pub fn is_error(&self) -> bool {
        self.finish_reason == FinishReason::Error
    }
}

/// Exceptional provider outcomes. Failures of a started agent (timeout,
/// non-zero exit, reported errors) are a response with [`FinishReason::Error`].
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Completion cancelled")]
    Cancelled,

    /// The agent process could not be spawned.
    #[error("{0}")]
    Spawn(String),
}

#[async_trait]
pub trait AgentProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn is_ready(&self) -> bool;

    async fn complete(&self, request: CompletionRequest)
        -> Result<CompletionResponse, ProviderError>;

    /// Abort the in-flight completion. A cancel that arrives before the next
    /// `complete` call makes that call resolve with
    /// [`ProviderError::Cancelled`] without starting the agent.
    fn cancel(&self);

    /// Forget a cancel that no completion consumed.
    fn clear_cancel(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Claude,
    #[serde(alias = "open-code")]
    #[value(name = "opencode", alias = "open-code")]
    OpenCode,
    Codex,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "claude",
            ProviderKind::OpenCode => "opencode",
            ProviderKind::Codex => "codex",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub program: Option<String>,
    pub model: Option<String>,
    pub workdir: Option<PathBuf>,
    pub timeouts: TimeoutConfig,
}

pub fn build_provider(kind: ProviderKind, settings: &ProviderSettings) -> Arc<dyn AgentProvider> {
    match kind {
        ProviderKind::Claude => Arc::new(CliProvider::new(claude::ClaudeBackend::new(settings), settings)),
        ProviderKind::OpenCode => {
            Arc::new(CliProvider::new(opencode::OpenCodeBackend::new(settings), settings))
        }
        ProviderKind::Codex => Arc::new(CliProvider::new(codex::CodexBackend::new(settings), settings)),
    }
}
