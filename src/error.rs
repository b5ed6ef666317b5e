use thiserror::Error;

use crate::task::StoreError;

/// Errors that escape [`RalphEngine::run_all_pending`](crate::engine::RalphEngine::run_all_pending).
///
/// Anything that goes wrong while a task is executing is turned into a
/// task-level outcome instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No agent provider configured")]
    NoProvider,

    #[error("Agent provider '{0}' is not ready (is the CLI installed and on PATH?)")]
    ProviderNotReady(String),

    #[error("Ralph is already running")]
    AlreadyRunning,

    #[error("Too many event listeners (limit {0})")]
    TooManyListeners(usize),

    #[error("Task store error: {0}")]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;
