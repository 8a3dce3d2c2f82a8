//! Atomic snapshot of orchestrator state, enough to resume a swarm after a restart.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::budget::BudgetPoolState;
use super::health::HealthRecord;
use super::plan::Plan;
use super::shared_context::{SharedContext, SharedEconomics};
use super::subtask::Subtask;

/// Where in the lifecycle the swarm was when the checkpoint was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Decomposing,
    Scheduling,
    ProbingModels,
    Planning,
    WaveLoop,
    FinalRescue,
    Verifying,
    Synthesizing,
    Complete,
}

/// A single entry in the orchestrator's decision log (human-readable audit trail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub at: DateTime<Utc>,
    pub summary: String,
}

/// A single entry in the orchestrator's error log (non-fatal errors encountered).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Complete snapshot of task queue state: every subtask plus wave membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub tasks: Vec<Subtask>,
    pub current_wave: usize,
    pub wave_membership: HashMap<usize, Vec<Uuid>>,
}

/// Aggregated counters the checkpoint carries for quick inspection without re-scanning
/// `tasks`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedStats {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub decomposed: usize,
}

/// A full, atomic snapshot of orchestrator state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    pub taken_at: DateTime<Utc>,
    pub phase: Phase,
    pub plan: Option<Plan>,
    pub queue: QueueSnapshot,
    pub stats: AggregatedStats,
    pub health_records: Vec<HealthRecord>,
    pub budget: BudgetPoolState,
    pub decision_log: Vec<DecisionLogEntry>,
    pub error_log: Vec<ErrorLogEntry>,
    pub original_prompt: String,
    pub shared_context: SharedContext,
    pub shared_economics: SharedEconomics,
}
