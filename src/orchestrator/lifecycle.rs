//! The pipeline stages surrounding the wave loop: resume, decompose, schedule, probe,
//! plan, final rescue, integration verification, and synthesis-plus-checkpoint.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::config::ProbeFailureStrategy;
use crate::domain::checkpoint::{Checkpoint, Phase};
use crate::domain::events::ExecutionEvent;
use crate::domain::plan::{IntegrationPlan, IntegrationStep, Plan};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::ports::chat_backend::{ChatMessage, ChatRequest, ToolSpec};
use crate::services;
use crate::services::task_queue::QueueLoadConfig;

use super::{Orchestrator, RunSummary};

/// Fraction of attempted tasks that must be stuck (failed-out-of-retries or skipped) on
/// resume before an immediate mid-swarm re-plan is forced, ahead of the wave loop's own
/// stall detection.
const RESUME_STUCK_RATIO_THRESHOLD: f64 = 0.4;

impl Orchestrator {
    /// Restores from the most recent checkpoint for the configured session, if persistence
    /// and a resume session id are both configured. Returns whether a resume occurred.
    pub(super) async fn resume_check(&mut self) -> OrchestratorResult<bool> {
        if !self.config.enable_persistence {
            return Ok(false);
        }
        let Some(session_id) = self.config.resume_session_id.clone() else {
            return Ok(false);
        };
        let Some(store) = self.checkpoint_store.clone() else {
            return Ok(false);
        };

        let checkpoint = match store.load_latest(&session_id).await {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => return Ok(false),
            Err(err) => {
                self.log_error(format!("failed to load checkpoint for resume: {err}"));
                return Ok(false);
            }
        };

        self.session_id = checkpoint.session_id;
        self.phase = checkpoint.phase;
        self.plan = checkpoint.plan;
        self.original_prompt = checkpoint.original_prompt;
        self.shared_context = checkpoint.shared_context;
        self.shared_economics = checkpoint.shared_economics;
        self.decision_log = checkpoint.decision_log;
        self.error_log = checkpoint.error_log;
        self.queue.restore(checkpoint.queue);
        self.health.restore(checkpoint.health_records);
        self.budget.restore(&checkpoint.budget);

        let reset = self.queue.reset_orphans_on_resume(self.config.worker_retries);
        self.emit(ExecutionEvent::StateResume { session_id: self.session_id.clone(), reset_orphans: reset });
        self.log_decision(format!("resumed session {} ({reset} orphaned dispatch(es) reset)", self.session_id));

        let attempted = self.queue.attempted_count();
        if attempted > 0 {
            let stats = self.queue.stats();
            let stuck = stats.failed + stats.skipped;
            let stuck_ratio = stuck as f64 / attempted as f64;
            if stuck_ratio > RESUME_STUCK_RATIO_THRESHOLD && !self.has_replanned {
                self.log_decision(format!(
                    "{stuck}/{attempted} attempted tasks are stuck on resume ({:.0}%); forcing an immediate re-plan",
                    stuck_ratio * 100.0
                ));
                self.stall_replan().await;
            }
        }

        Ok(true)
    }

    /// Decomposes `prompt` into a validated DAG via the configured orchestrator model.
    pub(super) async fn decompose_and_validate(&mut self, prompt: &str) -> OrchestratorResult<()> {
        self.phase = Phase::Decomposing;
        let result = services::decomposer::decompose(self.backend.as_ref(), &self.config.orchestrator_model, prompt).await?;

        if result.flat() {
            self.log_decision("decomposition produced a flat DAG: no dependencies among subtasks");
        }
        self.log_decision(format!(
            "decomposed into {} subtask(s) using {:?} strategy: {}",
            result.subtasks.len(),
            result.strategy,
            result.reasoning
        ));
        self.pending_decomposition = Some(result);
        Ok(())
    }

    /// Loads the pending decomposition into the queue and computes the dynamic budget
    /// reserve set aside for orchestrator-side LLM calls.
    pub(super) fn schedule(&mut self) -> OrchestratorResult<()> {
        self.phase = Phase::Scheduling;
        let decomposition = self
            .pending_decomposition
            .take()
            .ok_or_else(|| OrchestratorError::Other("schedule called with no pending decomposition".into()))?;

        let subtask_count = decomposition.subtasks.len();
        self.queue.load_from_decomposition(decomposition, &QueueLoadConfig { worker_retries: self.config.worker_retries })?;

        let reserve_ratio = self
            .config
            .orchestrator_reserve_ratio
            .max(subtask_count as f64 * 0.05)
            .min(0.40);
        self.reserve_tokens = (self.config.total_budget_tokens as f64 * reserve_ratio).round() as u64;

        self.log_decision(format!(
            "scheduled {subtask_count} subtask(s) across {} wave(s); orchestrator reserve {reserve_ratio:.2} ({} tokens)",
            self.queue.current_wave().max(1),
            self.reserve_tokens
        ));
        Ok(())
    }

    /// Issues one synthetic tool-call probe per distinct configured model, marking each
    /// unhealthy on failure. Aborts the run if every model fails and the configured
    /// `probe_failure_strategy` is `Abort`.
    pub(super) async fn probe_models(&mut self) {
        let distinct_models: HashSet<String> = self.workers.iter().map(|w| w.model.clone()).collect();
        if distinct_models.is_empty() {
            return;
        }
        self.phase = Phase::ProbingModels;

        let probe_tool = ToolSpec {
            name: "ping".into(),
            description: "Respond by calling this tool to confirm tool-calling support.".into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        };

        let mut any_healthy = false;
        for model in &distinct_models {
            let request = ChatRequest { model: model.clone(), max_tokens: 64, temperature: 0.0 };
            let messages = [ChatMessage::user("Call the ping tool to confirm you support tool calls.")];
            let outcome = tokio::time::timeout(
                Duration::from_millis(self.config.probe_timeout_ms),
                self.backend.chat_with_tools(&messages, &request, std::slice::from_ref(&probe_tool)),
            )
            .await;

            match outcome {
                Ok(Ok(response)) if !response.tool_calls.is_empty() => {
                    self.health.reset_health(model);
                    any_healthy = true;
                    self.emit(ExecutionEvent::ModelHealth { model: model.clone(), healthy: true });
                }
                Ok(Ok(_)) => {
                    self.health.mark_unhealthy(model);
                    self.emit(ExecutionEvent::ModelHealth { model: model.clone(), healthy: false });
                    self.log_error(format!("model {model} returned no tool call during capability probe"));
                }
                Ok(Err(err)) => {
                    self.health.mark_unhealthy(model);
                    self.emit(ExecutionEvent::ModelHealth { model: model.clone(), healthy: false });
                    self.log_error(format!("model {model} failed capability probe: {err}"));
                }
                Err(_) => {
                    self.health.mark_unhealthy(model);
                    self.emit(ExecutionEvent::ModelHealth { model: model.clone(), healthy: false });
                    self.log_error(format!("model {model} timed out during capability probe"));
                }
            }
        }

        if !any_healthy {
            match self.config.probe_failure_strategy {
                ProbeFailureStrategy::Abort => {
                    self.aborted = true;
                    self.log_decision("every model failed the capability probe; aborting (probe_failure_strategy = abort)");
                }
                ProbeFailureStrategy::WarnAndTry => {
                    self.log_error("every model failed the capability probe; proceeding anyway (probe_failure_strategy = warn-and-try)");
                    for model in &distinct_models {
                        self.health.reset_health(model);
                    }
                }
            }
        }
    }

    /// Asks the orchestrator model for per-task acceptance criteria and an optional
    /// integration-test plan. Non-fatal: a parse or call failure just leaves `self.plan`
    /// unset.
    pub(super) async fn plan(&mut self) {
        if !self.config.enable_planning || self.aborted {
            return;
        }
        self.phase = Phase::Planning;

        match self.request_plan().await {
            Ok(plan) => {
                let criteria_count = plan.acceptance_criteria.len();
                self.emit(ExecutionEvent::PlanComplete { acceptance_criteria_count: criteria_count });
                self.log_decision(format!("planning produced acceptance criteria for {criteria_count} subtask(s)"));
                self.plan = Some(plan);
            }
            Err(err) => self.log_error(format!("planning step failed, proceeding without a plan: {err}")),
        }
    }

    async fn request_plan(&self) -> anyhow::Result<Plan> {
        #[derive(Debug, Deserialize)]
        struct RawCriteria {
            index: usize,
            criteria: Vec<String>,
        }
        #[derive(Debug, Deserialize)]
        struct RawIntegrationStep {
            description: String,
            command: String,
            #[serde(default)]
            expected_result_hint: String,
            #[serde(default)]
            required: bool,
        }
        #[derive(Debug, Deserialize)]
        struct RawPlan {
            #[serde(default)]
            acceptance_criteria: Vec<RawCriteria>,
            #[serde(default)]
            integration_plan: Option<Vec<RawIntegrationStep>>,
        }

        let tasks = self.queue.all_tasks();
        let listing: Vec<String> = tasks.iter().enumerate().map(|(i, t)| format!("{i}: {}", t.description)).collect();

        let prompt = format!(
            "Subtasks:\n{}\n\nFor each subtask, list concrete acceptance criteria. Also propose an optional \
             integration-test plan to run once all subtasks complete. Reply with JSON: \
             {{\"acceptance_criteria\": [{{\"index\": int, \"criteria\": [\"...\"]}}], \
             \"integration_plan\": [{{\"description\": ..., \"command\": ..., \"expected_result_hint\": ..., \"required\": bool}}]}}",
            listing.join("\n")
        );

        let response = self
            .backend
            .chat(
                &[ChatMessage::system("You are a QA planning assistant."), ChatMessage::user(prompt)],
                &ChatRequest { model: self.config.orchestrator_model.clone(), max_tokens: 2048, temperature: 0.2 },
            )
            .await?;

        let raw: RawPlan = serde_json::from_str(response.content.trim())?;
        let acceptance_criteria = raw
            .acceptance_criteria
            .into_iter()
            .filter_map(|c| tasks.get(c.index).map(|t| (t.id, c.criteria)))
            .collect();
        let integration_plan = raw.integration_plan.map(|steps| IntegrationPlan {
            steps: steps
                .into_iter()
                .map(|s| IntegrationStep {
                    description: s.description,
                    command: s.command,
                    expected_result_hint: s.expected_result_hint,
                    required: s.required,
                })
                .collect(),
        });

        Ok(Plan { acceptance_criteria, integration_plan })
    }

    /// Lenient last pass: attempts to rescue every currently-skipped task whose
    /// dependencies are now satisfied, giving tasks orphaned by an earlier cascade-skip
    /// one last chance once the rest of the graph has settled.
    pub(super) fn final_rescue_pass(&mut self) {
        self.phase = Phase::FinalRescue;
        for id in self.queue.skipped_task_ids() {
            if self.queue.rescue_task(id, "final rescue pass").unwrap_or(false) {
                self.log_decision(format!("rescued skipped task {id} in the final rescue pass"));
            }
        }
    }

    /// Runs the integration plan's steps (if any) as synthetic worker dispatches,
    /// retrying a failed required step up to `max_verification_retries` times.
    pub(super) async fn verify_integration(&mut self) {
        if !self.config.enable_verification || self.aborted {
            return;
        }
        let Some(steps) = self.plan.as_ref().and_then(|p| p.integration_plan.as_ref()).map(|p| p.steps.clone()) else {
            return;
        };
        self.phase = Phase::Verifying;
        self.emit(ExecutionEvent::VerifyStart { step_count: steps.len() });

        let mut all_passed = true;
        for step in &steps {
            let mut attempt = 0;
            loop {
                let passed = self.run_verification_step(step).await;
                self.emit(ExecutionEvent::VerifyStep { description: step.description.clone(), passed });
                if passed || !step.required || attempt >= self.config.max_verification_retries {
                    if !passed && step.required {
                        all_passed = false;
                    }
                    break;
                }
                attempt += 1;
                self.log_decision(format!(
                    "required verification step '{}' failed, retrying ({attempt}/{})",
                    step.description, self.config.max_verification_retries
                ));
            }
        }
        self.emit(ExecutionEvent::VerifyComplete { passed: all_passed });
    }

    async fn run_verification_step(&self, step: &IntegrationStep) -> bool {
        match self.spawner.spawn("integration-verifier", &step.command, None).await {
            Ok(spawn_result) => spawn_result.success,
            Err(err) => {
                tracing::warn!(%err, step = %step.description, "integration verification step errored");
                false
            }
        }
    }

    /// Merges every completed task's output, checkpoints the final state if persistence is
    /// enabled, and returns the run summary.
    pub(super) async fn synthesize_and_checkpoint(&mut self) -> OrchestratorResult<RunSummary> {
        self.phase = Phase::Synthesizing;
        let completed = self.queue.completed_with_results();
        let synthesis = services::synthesizer::synthesize(&completed);
        if !synthesis.conflicts.is_empty() {
            self.log_decision(format!("synthesis resolved {} conflict(s) via {:?} strategy", synthesis.conflicts.len(), synthesis.strategy));
        }

        let stats = self.queue.stats();
        self.phase = Phase::Complete;
        self.emit(ExecutionEvent::Complete {
            success: stats.failed == 0 && stats.completed > 0,
            completed: stats.completed,
            failed: stats.failed,
            skipped: stats.skipped,
        });

        if self.config.enable_persistence {
            if let Some(store) = self.checkpoint_store.clone() {
                let checkpoint = self.build_checkpoint();
                match store.save(&checkpoint).await {
                    Ok(()) => self.emit(ExecutionEvent::StateCheckpoint { session_id: self.session_id.clone() }),
                    Err(err) => self.log_error(format!("final checkpoint save failed: {err}")),
                }
            }
        }

        let budget_stats = self.budget.stats();
        Ok(RunSummary {
            session_id: self.session_id.clone(),
            total_tasks: stats.total,
            completed: stats.completed,
            failed: stats.failed,
            skipped: stats.skipped,
            synthesized_output: synthesis.output,
            tokens_remaining: budget_stats.tokens_remaining(),
            cost_remaining: budget_stats.cost_remaining(),
        })
    }

    pub(super) fn build_checkpoint(&self) -> Checkpoint {
        Checkpoint {
            session_id: self.session_id.clone(),
            taken_at: chrono::Utc::now(),
            phase: self.phase,
            plan: self.plan.clone(),
            queue: self.queue.snapshot(),
            stats: self.queue.stats(),
            health_records: self.health.all_records(),
            budget: self.budget.stats(),
            decision_log: self.decision_log.clone(),
            error_log: self.error_log.clone(),
            original_prompt: self.original_prompt.clone(),
            shared_context: self.shared_context.clone(),
            shared_economics: self.shared_economics.clone(),
        }
    }
}
