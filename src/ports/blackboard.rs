//! An optional shared blackboard for posting findings. Deliberately out of scope for a
//! concrete implementation: the orchestrator posts through this trait and never reads back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindingType {
    Result,
    Blocker,
    Insight,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub topic: String,
    pub content: String,
    pub finding_type: FindingType,
    pub confidence: f32,
    pub tags: Vec<String>,
    pub related_files: Vec<String>,
}

#[async_trait]
pub trait Blackboard: Send + Sync {
    async fn post(&self, author: &str, finding: Finding) -> anyhow::Result<()>;
}

/// No-op implementation used whenever the enclosing repository doesn't wire a real
/// blackboard in; the orchestrator does not have a hard dependency on one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBlackboard;

#[async_trait]
impl Blackboard for NullBlackboard {
    async fn post(&self, _author: &str, _finding: Finding) -> anyhow::Result<()> {
        Ok(())
    }
}
