//! The low-level spawner that actually runs a worker against a subtask.
//!
//! Deliberately out of scope: the spawner owns its own sandbox and permission model. The
//! orchestrator only observes the result shape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Metrics reported back by a spawned worker run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpawnMetrics {
    pub tokens: u64,
    pub duration_ms: u64,
    /// `-1` encodes "timed out"; represented here as `None`.
    pub tool_calls: Option<i64>,
    pub files_modified: Option<Vec<String>>,
    pub closure_report: Option<serde_json::Value>,
}

/// Outcome of one spawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnResult {
    pub success: bool,
    pub output: String,
    pub metrics: SpawnMetrics,
}

impl SpawnResult {
    #[must_use]
    pub const fn timed_out(&self) -> bool {
        self.metrics.tool_calls.is_none()
    }
}

/// An opaque hint bundle attached to a retry dispatch. The spawner receives it without the
/// orchestrator special-casing prompt construction around it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryHints {
    pub feedback: Option<String>,
    pub previous_score: Option<u8>,
    pub previous_model: Option<String>,
    pub previous_files: Vec<String>,
}

/// The worker spawner external interface.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(
        &self,
        worker_name: &str,
        prompt: &str,
        retry_hints: Option<&RetryHints>,
    ) -> anyhow::Result<SpawnResult>;
}
