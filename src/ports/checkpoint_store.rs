//! Persistence boundary for orchestrator checkpoints.

use async_trait::async_trait;

use crate::domain::Checkpoint;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Atomically persists `checkpoint`, keyed by its session id.
    async fn save(&self, checkpoint: &Checkpoint) -> anyhow::Result<()>;

    /// Loads the most recent checkpoint for `session_id`. A corrupt or missing checkpoint
    /// returns `Ok(None)` rather than an error.
    async fn load_latest(&self, session_id: &str) -> anyhow::Result<Option<Checkpoint>>;
}
