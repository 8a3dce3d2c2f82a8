//! Cross-worker failure memory and economics aggregation.
//!
//! Shared context is read-only from a worker's point of view: it is assembled by the
//! orchestrator from completed results and handed to the decomposer/re-planner as a
//! progress summary, and to workers as part of retry context. It never receives direct
//! mutation from dispatch outcomes outside the orchestrator's own decision loop.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A remembered failure, kept so future retries and re-plans can avoid repeating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RememberedFailure {
    pub task_id: Uuid,
    pub model: String,
    pub reason: String,
}

/// Cross-worker failure memory: what has already been tried and failed, grouped by task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedContext {
    failures: HashMap<Uuid, Vec<RememberedFailure>>,
}

impl SharedContext {
    pub fn record_failure(&mut self, task_id: Uuid, model: impl Into<String>, reason: impl Into<String>) {
        self.failures.entry(task_id).or_default().push(RememberedFailure {
            task_id,
            model: model.into(),
            reason: reason.into(),
        });
    }

    #[must_use]
    pub fn failures_for(&self, task_id: Uuid) -> &[RememberedFailure] {
        self.failures.get(&task_id).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn models_that_failed(&self, task_id: Uuid) -> Vec<String> {
        self.failures_for(task_id).iter().map(|f| f.model.clone()).collect()
    }

    /// Distinct models that have failed anywhere in the swarm so far, for the re-plan
    /// prompt to steer away from.
    #[must_use]
    pub fn all_failed_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.failures.values().flatten().map(|f| f.model.clone()).collect();
        models.sort();
        models.dedup();
        models
    }
}

/// Economics aggregated across the whole swarm so far, used for progress summaries fed to
/// the decomposer/re-planner and for the mid-swarm assessment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedEconomics {
    pub tokens_spent: u64,
    pub cost_spent: f64,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub tasks_skipped: usize,
}

impl SharedEconomics {
    #[must_use]
    pub fn average_tokens_per_completed_task(&self) -> f64 {
        if self.tasks_completed == 0 {
            0.0
        } else {
            self.tokens_spent as f64 / self.tasks_completed as f64
        }
    }

    #[must_use]
    pub fn success_ratio(&self, attempted: usize) -> f64 {
        if attempted == 0 {
            1.0
        } else {
            self.tasks_completed as f64 / attempted as f64
        }
    }
}
