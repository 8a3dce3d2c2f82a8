//! Orchestrator error taxonomy.
//!
//! Every kind enumerated in the error-handling design gets its own variant so call sites
//! match on kind rather than string-sniffing a message. Errors crossing the `ChatBackend`/
//! `WorkerSpawner` trait boundary arrive as `anyhow::Error` and are wrapped into `Other`
//! unless the orchestrator needs to distinguish a specific kind (rate limit, timeout).

use thiserror::Error;
use uuid::Uuid;

/// Orchestrator-level errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("budget exhausted")]
    BudgetExhausted,

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("hollow completion from model {model}")]
    HollowCompletion { model: String },

    #[error("quality rejected with score {score}")]
    QualityRejected { score: u8 },

    #[error("dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("no worker available for task {0}")]
    NoWorkerAvailable(Uuid),

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("dependency cycle detected involving task: {0}")]
    DependencyCycle(Uuid),

    #[error("decomposition parse error: {0}")]
    DecompositionParseError(String),

    #[error("insufficient subtasks: {0}")]
    InsufficientSubtasks(String),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("checkpoint I/O error: {0}")]
    CheckpointIo(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        OrchestratorError::CheckpointIo(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::DecompositionParseError(err.to_string())
    }
}
