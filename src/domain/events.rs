//! Events emitted by the orchestrator for observers.
//!
//! Observers are side-effect-only: delivery is one-way over an [`mpsc`](tokio::sync::mpsc)
//! channel and a panicking subscriber cannot affect the orchestrator's own state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::subtask::FailureMode;

/// A minimal typed payload for each kind of thing observers might want to react to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
    TaskDispatched { task_id: Uuid, model: String },
    TaskCompleted { task_id: Uuid, quality_score: Option<u8>, degraded: bool },
    TaskFailed { task_id: Uuid, mode: FailureMode, attempts: u32 },
    TaskSkipped { task_id: Uuid, reason: String },
    TaskResilience { task_id: Uuid, strategy: String },
    TaskAttempt { task_id: Uuid, attempt: u32 },

    WaveStart { wave: usize, task_count: usize },
    WaveComplete { wave: usize, completed: usize, failed: usize },
    WaveAllFailed { wave: usize },

    QualityRejected { task_id: Uuid, model: String, score: u8 },

    ModelHealth { model: String, healthy: bool },
    ModelFailover { task_id: Uuid, from_model: String, to_model: String },

    BudgetUpdate { tokens_remaining: u64, cost_remaining: f64 },

    CircuitOpen { scope: String },
    CircuitClosed { scope: String },

    OrchestratorDecision { summary: String },
    OrchestratorLlm { purpose: String },

    PlanComplete { acceptance_criteria_count: usize },
    ReviewStart { wave: usize },
    ReviewComplete { wave: usize, fixup_tasks: usize },
    VerifyStart { step_count: usize },
    VerifyStep { description: String, passed: bool },
    VerifyComplete { passed: bool },

    StateCheckpoint { session_id: String },
    StateResume { session_id: String, reset_orphans: usize },

    Stall { attempted: usize, success_ratio: f64 },
    Replan { new_task_count: usize },

    Complete { success: bool, completed: usize, failed: usize, skipped: usize },
    Error { message: String },
}
