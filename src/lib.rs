//! Ralph: an autonomous Kanban runner.
//!
//! Drains a task board's `todo` column through a dependency-aware queue,
//! handing each task to a coding-agent CLI (Claude Code, OpenCode or Codex)
//! run as a streaming subprocess, and records every attempt as a redacted,
//! validated run artifact.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod id;
pub mod logging;
pub mod notify;
pub mod provider;
pub mod recorder;
pub mod task;
pub mod timeout;

pub use config::RalphConfig;
pub use engine::{
    EngineEvent, EngineEventKind, EngineProgress, EngineSettings, EngineStatus, RalphEngine,
    RalphRunResult, RunOptions,
};
pub use error::{EngineError, EngineResult};
pub use provider::{
    build_provider, AgentProvider, CompletionRequest, CompletionResponse, FinishReason,
    ProviderError, ProviderKind,
};
pub use recorder::{Run, RunRecorder, RunStatus, RunStore};
pub use task::{InMemoryTaskStore, JsonTaskStore, Task, TaskStatus, TaskStore};
pub use timeout::TimeoutConfig;
