//! The swarm orchestrator: a thin coordinator over the task queue, budget pool, health
//! tracker, worker pool, and quality gate, driving the lifecycle described in the design
//! notes.
//!
//! Split across submodules the way the origin codebase splits its orchestrator: this file
//! holds the struct, its builder, and the top-level `run` entry point; `lifecycle` holds the
//! surrounding pipeline stages (resume, decompose, schedule, probe, plan, rescue, verify,
//! synthesize); `wave_loop` holds the per-wave dispatch loop and the resilience-adjacent
//! behaviors that only make sense while a wave is in flight.

mod lifecycle;
mod wave_loop;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::domain::checkpoint::{DecisionLogEntry, ErrorLogEntry, Phase};
use crate::domain::events::ExecutionEvent;
use crate::domain::shared_context::{SharedContext, SharedEconomics};
use crate::error::OrchestratorResult;
use crate::ports::blackboard::{Blackboard, NullBlackboard};
use crate::ports::chat_backend::ChatBackend;
use crate::ports::checkpoint_store::CheckpointStore;
use crate::ports::spawner::WorkerSpawner;
use crate::services::budget_pool::{BudgetPool, ReservationHandle};
use crate::services::circuit_breaker::CircuitBreaker;
use crate::services::health_tracker::HealthTracker;
use crate::services::quality_gate::JudgeCircuitBreaker;
use crate::services::resilience::ResilienceConfig;
use crate::services::task_queue::TaskQueue;
use crate::services::worker_pool::{Worker, WorkerPool};

/// Final outcome of one `run` call, enough for a caller to decide what happened without
/// walking the task queue itself.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub session_id: String,
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub synthesized_output: String,
    pub tokens_remaining: u64,
    pub cost_remaining: f64,
}

/// Tracks hollow-completion streaks for the opt-in termination policy.
#[derive(Debug, Default)]
pub(super) struct HollowTracker {
    pub dispatches: usize,
    pub hollow_count: usize,
    pub consecutive_hollows: usize,
}

/// The central coordinator. Owns every piece of mutable swarm state exclusively; nothing
/// outside the decision loop mutates a subtask's status, a budget reservation, or a health
/// record directly.
pub struct Orchestrator {
    pub(super) config: OrchestratorConfig,
    pub(super) backend: Arc<dyn ChatBackend>,
    pub(super) spawner: Arc<dyn WorkerSpawner>,
    pub(super) checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    pub(super) blackboard: Arc<dyn Blackboard>,
    pub(super) event_tx: Option<mpsc::UnboundedSender<ExecutionEvent>>,

    pub(super) queue: TaskQueue,
    pub(super) budget: BudgetPool,
    pub(super) health: HealthTracker,
    pub(super) judge_breaker: JudgeCircuitBreaker,
    pub(super) rate_limit_breaker: CircuitBreaker,
    pub(super) worker_pool: WorkerPool,
    pub(super) workers: Vec<Worker>,

    pub(super) shared_context: SharedContext,
    pub(super) shared_economics: SharedEconomics,
    pub(super) resilience_config: ResilienceConfig,

    pub(super) session_id: String,
    pub(super) original_prompt: String,
    pub(super) phase: Phase,
    pub(super) plan: Option<crate::domain::plan::Plan>,
    pub(super) decision_log: Vec<DecisionLogEntry>,
    pub(super) error_log: Vec<ErrorLogEntry>,
    pub(super) stagger: Duration,
    pub(super) hollow: HollowTracker,
    pub(super) has_replanned: bool,
    pub(super) round_robin_index: usize,
    pub(super) aborted: bool,

    /// Decomposition awaiting `schedule()`; consumed and cleared once loaded into `queue`.
    pub(super) pending_decomposition: Option<crate::domain::decomposition::DecompositionResult>,
    /// Token headroom `schedule()` sets aside for orchestrator-side LLM calls (decompose,
    /// judge, planning, re-plan) rather than worker dispatch, per the dynamic reserve ratio.
    pub(super) reserve_tokens: u64,
    /// Live reservation per in-flight task, released against actual usage once its
    /// dispatch completes.
    pub(super) pending_reservations: HashMap<Uuid, ReservationHandle>,
}

const MIN_STAGGER: Duration = Duration::from_millis(200);
const MAX_STAGGER: Duration = Duration::from_secs(10);

impl Orchestrator {
    pub(super) fn log_decision(&mut self, summary: impl Into<String>) {
        let summary = summary.into();
        tracing::info!(%summary, "orchestrator decision");
        self.decision_log.push(DecisionLogEntry { at: chrono::Utc::now(), summary: summary.clone() });
        self.emit(ExecutionEvent::OrchestratorDecision { summary });
    }

    pub(super) fn log_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%message, "orchestrator non-fatal error");
        self.error_log.push(ErrorLogEntry { at: chrono::Utc::now(), message: message.clone() });
        self.emit(ExecutionEvent::Error { message });
    }

    pub(super) fn emit(&self, event: ExecutionEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    pub(super) fn next_round_robin(&mut self) -> usize {
        self.round_robin_index = self.round_robin_index.wrapping_add(1);
        self.round_robin_index
    }

    pub(super) fn widen_stagger_on_rate_limit(&mut self) {
        self.stagger = Duration::from_secs_f64((self.stagger.as_secs_f64() * 1.5).clamp(MIN_STAGGER.as_secs_f64(), MAX_STAGGER.as_secs_f64()));
    }

    pub(super) fn narrow_stagger_on_success(&mut self) {
        self.stagger = Duration::from_secs_f64((self.stagger.as_secs_f64() * 0.9).clamp(MIN_STAGGER.as_secs_f64(), MAX_STAGGER.as_secs_f64()));
    }

    /// Runs the full lifecycle against `prompt`, returning once the swarm has reached a
    /// terminal phase (complete, aborted, or budget-exhausted).
    pub async fn run(&mut self, prompt: &str) -> OrchestratorResult<RunSummary> {
        self.original_prompt = prompt.to_string();

        let resumed = self.resume_check().await?;
        if !resumed {
            self.decompose_and_validate(prompt).await?;
            self.schedule()?;
            self.probe_models().await;
            self.plan().await;
        }

        self.wave_loop().await?;
        self.final_rescue_pass();
        self.verify_integration().await;
        let summary = self.synthesize_and_checkpoint().await?;

        Ok(summary)
    }
}

/// Builds an [`Orchestrator`] from its external collaborators and configuration, the way the
/// origin codebase's executors accumulate optional services via `with_*` methods before a
/// final `build`.
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    backend: Arc<dyn ChatBackend>,
    spawner: Arc<dyn WorkerSpawner>,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    blackboard: Arc<dyn Blackboard>,
    event_tx: Option<mpsc::UnboundedSender<ExecutionEvent>>,
    session_id: Option<String>,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn new(config: OrchestratorConfig, backend: Arc<dyn ChatBackend>, spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self { config, backend, spawner, checkpoint_store: None, blackboard: Arc::new(NullBlackboard), event_tx: None, session_id: None }
    }

    #[must_use]
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    #[must_use]
    pub fn with_blackboard(mut self, blackboard: Arc<dyn Blackboard>) -> Self {
        self.blackboard = blackboard;
        self
    }

    #[must_use]
    pub fn with_event_channel(mut self, tx: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn build(self) -> Orchestrator {
        let workers: Vec<Worker> = self
            .config
            .workers
            .iter()
            .map(|spec| Worker {
                name: spec.name.clone(),
                model: spec.model.clone(),
                capabilities: spec.capabilities.iter().cloned().collect(),
                allowed_tools: spec.allowed_tools.clone(),
                policy_profile: spec.policy_profile.clone(),
                context_window: spec.context_window,
            })
            .collect();

        let worker_pool = WorkerPool::new(Arc::clone(&self.spawner), self.config.max_concurrency);
        let budget = BudgetPool::new(self.config.total_budget_tokens, self.config.max_cost, None);
        let resilience_config = ResilienceConfig {
            auto_split_enabled: self.config.auto_split.enabled,
            auto_split_complexity_floor: self.config.auto_split.complexity_floor,
            auto_split_splittable_types: self.config.auto_split.splittable_types.clone(),
            auto_split_max_subtasks: self.config.auto_split.max_subtasks,
            micro_decompose_complexity_floor: 4,
            degraded_quality_cap: 2,
        };

        let initial_stagger =
            Duration::from_millis(self.config.retry_base_delay_ms).clamp(MIN_STAGGER, MAX_STAGGER);

        Orchestrator {
            config: self.config,
            backend: self.backend,
            spawner: self.spawner,
            checkpoint_store: self.checkpoint_store,
            blackboard: self.blackboard,
            event_tx: self.event_tx,
            queue: TaskQueue::new(),
            budget,
            health: HealthTracker::new(),
            judge_breaker: JudgeCircuitBreaker::new(),
            rate_limit_breaker: CircuitBreaker::new(),
            worker_pool,
            workers,
            shared_context: SharedContext::default(),
            shared_economics: SharedEconomics::default(),
            resilience_config,
            session_id: self.session_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            original_prompt: String::new(),
            phase: Phase::Decomposing,
            plan: None,
            decision_log: Vec::new(),
            error_log: Vec::new(),
            stagger: initial_stagger,
            hollow: HollowTracker::default(),
            has_replanned: false,
            round_robin_index: 0,
            aborted: false,
            pending_decomposition: None,
            reserve_tokens: 0,
            pending_reservations: HashMap::new(),
        }
    }
}
