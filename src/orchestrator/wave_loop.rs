//! The per-wave dispatch loop: worker selection, bounded concurrent dispatch, quality
//! gating, resilience resolution, and the wave-boundary housekeeping (review, budget
//! reallocation log, mid-swarm assessment, stall-triggered re-plan).

use std::collections::HashMap;

use serde::Deserialize;
use uuid::Uuid;

use crate::domain::checkpoint::Phase;
use crate::domain::events::ExecutionEvent;
use crate::domain::subtask::{FailureMode, Subtask, SubtaskResult, SubtaskStatus};
use crate::error::OrchestratorResult;
use crate::ports::chat_backend::{ChatMessage, ChatRequest};
use crate::ports::spawner::RetryHints;
use crate::services::quality_gate;
use crate::services::resilience::{self, ResilienceDecision};
use crate::services::worker_pool::{select_worker, DispatchOutcome};

use super::Orchestrator;

/// Rough per-dispatch token estimate, scaled by complexity, used to size budget
/// reservations ahead of a result actually coming back.
fn estimate_tokens(task: &Subtask) -> u64 {
    2_000 + u64::from(task.complexity) * 3_000
}

fn estimate_cost(tokens: u64) -> f64 {
    tokens as f64 * 0.000_02
}

/// Fraction of the remaining ready/pending backlog the mid-swarm assessment is allowed to
/// triage in one pass.
const MID_SWARM_TRIAGE_FRACTION: f64 = 0.20;

/// Minimum attempted count before a stall is even considered.
const STALL_MIN_ATTEMPTED: usize = 5;
const STALL_SUCCESS_RATIO_THRESHOLD: f64 = 0.4;

impl Orchestrator {
    /// Runs waves until the DAG is exhausted, the budget runs out, or the run is aborted.
    pub(super) async fn wave_loop(&mut self) -> OrchestratorResult<()> {
        if self.aborted {
            return Ok(());
        }
        self.phase = Phase::WaveLoop;

        loop {
            if self.aborted || !self.budget.has_capacity() {
                if !self.budget.has_capacity() {
                    self.log_decision("budget exhausted; ending wave loop");
                }
                break;
            }

            let wave = self.queue.current_wave();
            let task_count = self.queue.get_ready_tasks().len();
            self.emit(ExecutionEvent::WaveStart { wave, task_count });

            self.run_dispatch_loop_for_wave().await;

            let stats = self.queue.stats();
            self.emit(ExecutionEvent::WaveComplete { wave, completed: stats.completed, failed: stats.failed });
            if stats.completed == 0 && task_count > 0 {
                self.emit(ExecutionEvent::WaveAllFailed { wave });
            }

            self.judge_breaker.reset_at_wave_boundary();
            self.mid_swarm_assessment();
            self.post_wave_review().await;
            self.check_for_stall().await;

            let reallocated = self.budget.reallocate_unused();
            self.emit(ExecutionEvent::BudgetUpdate { tokens_remaining: reallocated, cost_remaining: self.budget.stats().cost_remaining() });

            if self.config.enable_persistence {
                if let Some(store) = self.checkpoint_store.clone() {
                    let checkpoint = self.build_checkpoint();
                    if let Err(err) = store.save(&checkpoint).await {
                        self.log_error(format!("wave checkpoint save failed: {err}"));
                    } else {
                        self.emit(ExecutionEvent::StateCheckpoint { session_id: self.session_id.clone() });
                    }
                }
            }

            if self.aborted || !self.queue.advance_wave() {
                break;
            }
        }
        Ok(())
    }

    /// Keeps filling available worker slots and draining completions until the current
    /// wave (plus any ready task from later waves used as slot-filler) has nothing left
    /// in flight or ready.
    async fn run_dispatch_loop_for_wave(&mut self) {
        loop {
            if self.aborted || !self.budget.has_capacity() {
                break;
            }

            self.rate_limit_breaker.tick();
            if !self.rate_limit_breaker.is_open() {
                self.dispatch_available_slots();
            }

            if self.worker_pool.active_count() == 0 {
                break;
            }

            if let Some(outcome) = self.worker_pool.wait_for_any().await {
                self.handle_dispatch_outcome(outcome).await;
            } else {
                break;
            }
        }
    }

    fn dispatch_available_slots(&mut self) {
        let mut slots = self.worker_pool.available_slots();
        if slots == 0 {
            return;
        }

        let mut candidates = self.queue.get_ready_tasks();
        if candidates.is_empty() {
            candidates = self.queue.get_all_ready_tasks();
        }

        let ids: Vec<Uuid> = candidates.iter().map(|t| t.id).collect();
        for id in ids {
            if slots == 0 {
                break;
            }
            let Some(task) = self.queue.get(id).cloned() else { continue };
            let round_robin = self.next_round_robin();
            let Some(worker) = select_worker(&task, &self.workers, &self.health, round_robin).cloned() else {
                continue;
            };

            let tokens = estimate_tokens(&task);
            let cost = estimate_cost(tokens);
            let reservation = match self.budget.reserve(tokens, cost) {
                Ok(r) => r,
                Err(_) => {
                    self.log_decision("budget reservation failed ahead of dispatch; halting new dispatches for this pass");
                    break;
                }
            };

            if self.queue.mark_dispatched(id, &worker.model).is_err() {
                self.budget.release(reservation, 0, 0.0);
                continue;
            }

            let prompt = self.build_worker_prompt(&task);
            let retry_hints = self.retry_hints_for(&task);
            self.emit(ExecutionEvent::TaskDispatched { task_id: id, model: worker.model.clone() });
            self.emit(ExecutionEvent::TaskAttempt { task_id: id, attempt: task.attempts + 1 });

            self.pending_reservations.insert(id, reservation);
            self.worker_pool.dispatch(task, worker, prompt, retry_hints);
            self.hollow.dispatches += 1;
            slots -= 1;
        }
    }

    fn build_worker_prompt(&self, task: &Subtask) -> String {
        let mut prompt = format!("Task: {}\n\nTarget files: {:?}", task.description, task.target_files);
        if let Some(ctx) = &task.retry_context {
            if let Some(feedback) = &ctx.feedback {
                prompt.push_str(&format!("\n\nFeedback from the previous attempt: {feedback}"));
            }
        }
        prompt
    }

    fn retry_hints_for(&self, task: &Subtask) -> Option<RetryHints> {
        task.retry_context.as_ref().map(|ctx| RetryHints {
            feedback: ctx.feedback.clone(),
            previous_score: ctx.previous_score,
            previous_model: ctx.previous_model.clone(),
            previous_files: ctx.previous_files.clone(),
        })
    }

    async fn handle_dispatch_outcome(&mut self, outcome: DispatchOutcome) {
        let task_id = outcome.task_id;
        let Some(task) = self.queue.get(task_id).cloned() else { return };
        let model = task.assigned_model.clone().unwrap_or_default();

        let result = crate::services::worker_pool::WorkerPool::to_task_result(&outcome.spawn_result, &model, outcome.duration);
        if let Some(reservation) = self.pending_reservations.remove(&task_id) {
            self.budget.release(reservation, result.tokens_used, result.cost_used);
        }

        if let Err(err) = &outcome.spawn_result {
            self.handle_dispatch_error(task_id, &task, &model, err, result).await;
            return;
        }

        if result.timed_out() {
            self.handle_timeout(task_id, &task, &model).await;
            return;
        }

        let hollow = result.output.trim().len() < self.config.hollow_output_threshold;
        if hollow {
            self.record_hollow(&model);
        } else {
            self.hollow.consecutive_hollows = 0;
        }
        if self.check_hollow_termination() {
            return;
        }

        let proceeds = self.queue.resolve_pending_cascade_skip(task_id, !hollow).unwrap_or(true);
        if !proceeds {
            self.emit(ExecutionEvent::TaskSkipped { task_id, reason: "cascade-skip honored after dispatch completed".into() });
            return;
        }

        if hollow {
            self.fail_or_resolve(task_id, &task, &model, Some(result), FailureMode::Hollow).await;
            return;
        }

        let verdict = quality_gate::evaluate(
            self.backend.as_ref(),
            &self.config.judge_model,
            &task,
            &result,
            self.plan.as_ref(),
            &self.judge_breaker,
            self.config.enable_concrete_validation,
        )
        .await;

        let threshold = task.quality_threshold(self.config.quality_threshold);
        if verdict.passed && verdict.score >= threshold {
            self.judge_breaker.record_acceptance(&model);
            self.health.record_success(&model, result.duration_ms as f64);
            self.narrow_stagger_on_success();
            let mut accepted = result;
            accepted.quality_score = Some(verdict.score);
            self.shared_economics.tokens_spent += accepted.tokens_used;
            self.shared_economics.cost_spent += accepted.cost_used;
            self.shared_economics.tasks_completed += 1;
            let degraded = accepted.degraded;
            let finding = crate::ports::blackboard::Finding {
                topic: task.description.clone(),
                content: accepted.output.clone(),
                finding_type: crate::ports::blackboard::FindingType::Result,
                confidence: f32::from(verdict.score) / 5.0,
                tags: vec![crate::services::worker_pool::required_capability(&task.task_type)],
                related_files: accepted.files_modified.clone(),
            };
            match self.queue.mark_completed(task_id, accepted) {
                Ok(()) => {
                    self.emit(ExecutionEvent::TaskCompleted { task_id, quality_score: Some(verdict.score), degraded });
                    if let Err(err) = self.blackboard.post(&model, finding).await {
                        self.log_error(format!("blackboard post failed for task {task_id}: {err}"));
                    }
                }
                Err(err) => self.log_error(format!("failed to mark task {task_id} completed: {err}")),
            }
        } else {
            self.judge_breaker.record_rejection(&model);
            self.health.record_quality_rejection(&model, verdict.score);
            self.emit(ExecutionEvent::QualityRejected { task_id, model: model.clone(), score: verdict.score });
            let mut rejected = result;
            rejected.feedback = Some(verdict.feedback);
            rejected.quality_score = Some(verdict.score);
            self.fail_or_resolve(task_id, &task, &model, Some(rejected), FailureMode::Quality).await;
        }
    }

    async fn handle_dispatch_error(&mut self, task_id: Uuid, task: &Subtask, model: &str, err: &anyhow::Error, result: SubtaskResult) {
        let message = err.to_string();
        let is_rate_limit = message.to_ascii_lowercase().contains("rate limit");
        if is_rate_limit {
            self.health.record_failure(model, crate::services::health_tracker::FailureKind::RateLimit);
            if self.rate_limit_breaker.record_rate_limit() {
                self.emit(ExecutionEvent::CircuitOpen { scope: "global-rate-limit".into() });
            }
            self.widen_stagger_on_rate_limit();
            self.fail_or_resolve(task_id, task, model, Some(result), FailureMode::RateLimit).await;
        } else {
            self.health.record_failure(model, crate::services::health_tracker::FailureKind::Generic);
            self.log_error(format!("dispatch error for task {task_id}: {message}"));
            self.fail_or_resolve(task_id, task, model, Some(result), FailureMode::Error).await;
        }
    }

    async fn handle_timeout(&mut self, task_id: Uuid, task: &Subtask, model: &str) {
        self.health.record_failure(model, crate::services::health_tracker::FailureKind::Generic);
        if let Some(t) = self.queue.get(task_id) {
            let consecutive = t.consecutive_timeouts + 1;
            if self.config.enable_model_failover && consecutive >= self.config.consecutive_timeout_limit {
                self.emit(ExecutionEvent::ModelFailover { task_id, from_model: model.to_string(), to_model: "next-healthy".into() });
                self.health.mark_unhealthy(model);
                self.log_decision(format!("task {task_id} timed out {consecutive} times consecutively on {model}; marking it unhealthy to force failover"));
            }
        }
        self.fail_or_resolve(task_id, task, model, None, FailureMode::Timeout).await;
    }

    fn record_hollow(&mut self, model: &str) {
        self.health.record_hollow(model);
        self.hollow.hollow_count += 1;
        self.hollow.consecutive_hollows += 1;
    }

    /// Checks whether the configured hollow-completion termination policy should end the
    /// run. Returns `true` if it just aborted the run.
    fn check_hollow_termination(&mut self) -> bool {
        if !self.config.enable_hollow_termination || self.hollow.dispatches < self.config.hollow_termination_min_dispatches {
            return false;
        }
        let ratio = self.hollow.hollow_count as f64 / self.hollow.dispatches as f64;
        if ratio >= self.config.hollow_termination_ratio {
            self.aborted = true;
            self.log_decision(format!(
                "hollow completion ratio {ratio:.2} over {} dispatches exceeds termination threshold {:.2}; aborting",
                self.hollow.dispatches, self.config.hollow_termination_ratio
            ));
            self.worker_pool.cancel_all();
            return true;
        }
        false
    }

    /// Shared tail of every failure path: mark the failure against the retry limit, then
    /// if retries are exhausted, hand off to the resilience pipeline.
    async fn fail_or_resolve(&mut self, task_id: Uuid, task: &Subtask, model: &str, result: Option<SubtaskResult>, mode: FailureMode) {
        self.queue.record_failure_context(task_id, mode, result.clone());
        self.shared_context.record_failure(task_id, model, format!("{mode:?}"));
        self.shared_economics.tasks_failed += 1;

        // Auto-split only applies to a foundation task's first failed attempt, so it must be
        // evaluated against the pre-retry snapshot, before `mark_failed_without_cascade` below
        // consumes that attempt.
        let pre_retry = self.queue.get(task_id).cloned().unwrap_or_else(|| task.clone());
        let split = resilience::try_auto_split(self.backend.as_ref(), &self.config.orchestrator_model, &pre_retry, &self.resilience_config)
            .await
            .unwrap_or_else(|err| {
                self.log_error(format!("auto-split evaluation failed for task {task_id}: {err}"));
                None
            });
        if let Some(subtasks) = split {
            self.emit(ExecutionEvent::TaskResilience { task_id, strategy: "auto-split".into() });
            self.emit(ExecutionEvent::TaskFailed { task_id, mode, attempts: task.attempts + 1 });
            if let Err(err) = self.queue.replace_with_subtasks(task_id, subtasks) {
                self.log_error(format!("failed to replace task {task_id} with auto-split subtasks: {err}"));
            }
            return;
        }

        let can_retry = self.queue.mark_failed_without_cascade(task_id, self.config.worker_retries).unwrap_or(false);
        self.emit(ExecutionEvent::TaskFailed { task_id, mode, attempts: task.attempts + 1 });

        if can_retry {
            self.record_retry_context(task_id, model, result);
            return;
        }

        let refreshed = self.queue.get(task_id).cloned().unwrap_or_else(|| task.clone());
        let decision = resilience::resolve(self.backend.as_ref(), &self.config.orchestrator_model, &refreshed, result.as_ref(), &self.resilience_config).await;
        match decision {
            ResilienceDecision::Split(subtasks) => {
                self.emit(ExecutionEvent::TaskResilience { task_id, strategy: "auto-split".into() });
                if let Err(err) = self.queue.replace_with_subtasks(task_id, subtasks) {
                    self.log_error(format!("failed to replace task {task_id} with split subtasks: {err}"));
                }
            }
            ResilienceDecision::MicroDecompose(subtasks) => {
                self.emit(ExecutionEvent::TaskResilience { task_id, strategy: "micro-decompose".into() });
                if let Err(err) = self.queue.replace_with_subtasks(task_id, subtasks) {
                    self.log_error(format!("failed to replace task {task_id} with micro-decomposed subtasks: {err}"));
                }
            }
            ResilienceDecision::DegradedAccept(degraded) => {
                self.emit(ExecutionEvent::TaskResilience { task_id, strategy: "degraded-acceptance".into() });
                if let Err(err) = self.queue.accept_degraded(task_id, degraded) {
                    self.log_error(format!("failed to accept degraded result for task {task_id}: {err}"));
                }
            }
            ResilienceDecision::CascadeSkip => {
                self.emit(ExecutionEvent::TaskResilience { task_id, strategy: "cascade-skip".into() });
                self.emit(ExecutionEvent::TaskSkipped { task_id, reason: "resilience pipeline exhausted".into() });
                self.shared_economics.tasks_skipped += 1;
                self.queue.trigger_cascade_skip(task_id);
            }
        }
    }

    fn record_retry_context(&mut self, task_id: Uuid, model: &str, result: Option<SubtaskResult>) {
        use crate::domain::subtask::RetryContext;
        let ctx = RetryContext {
            feedback: result.as_ref().and_then(|r| r.feedback.clone()),
            previous_score: result.as_ref().and_then(|r| r.quality_score),
            previous_model: Some(model.to_string()),
            previous_files: result.map(|r| r.files_modified).unwrap_or_default(),
            swarm_progress_summary: None,
            elapsed_seconds: None,
        };
        self.queue.set_retry_context(task_id, ctx);
    }

    /// Budget-aware triage: when remaining budget is tight relative to the reserve,
    /// cascade-skips up to 20% of the still-pending backlog, lowest-priority first
    /// (highest complexity, non-foundation tasks go first).
    fn mid_swarm_assessment(&mut self) {
        let stats = self.budget.stats();
        if stats.tokens_remaining() > self.reserve_tokens * 2 {
            return;
        }

        let mut backlog: Vec<Subtask> = self
            .queue
            .all_tasks()
            .into_iter()
            .filter(|t| matches!(t.status, SubtaskStatus::Pending | SubtaskStatus::Ready))
            .cloned()
            .collect();
        if backlog.is_empty() {
            return;
        }

        backlog.sort_by(|a, b| (a.foundation, std::cmp::Reverse(a.complexity)).cmp(&(b.foundation, std::cmp::Reverse(b.complexity))));
        let triage_count = ((backlog.len() as f64) * MID_SWARM_TRIAGE_FRACTION).ceil() as usize;
        let to_skip: Vec<Uuid> = backlog.into_iter().rev().take(triage_count).map(|t| t.id).collect();

        if to_skip.is_empty() {
            return;
        }
        self.log_decision(format!(
            "budget is tight ({} tokens remaining vs {} reserve); triaging {} low-priority task(s) out of the plan",
            stats.tokens_remaining(),
            self.reserve_tokens,
            to_skip.len()
        ));
        for id in to_skip {
            self.queue.trigger_cascade_skip(id);
            self.shared_economics.tasks_skipped += 1;
            self.emit(ExecutionEvent::TaskSkipped { task_id: id, reason: "mid-swarm budget triage".into() });
        }
    }

    /// Optional LLM-backed review of the wave just completed: asks for fix-up subtasks to
    /// address anything the completed outputs left dangling.
    async fn post_wave_review(&mut self) {
        if !self.config.enable_wave_review || self.aborted {
            return;
        }
        let wave = self.queue.current_wave();
        let completed_this_wave: Vec<&Subtask> =
            self.queue.all_tasks().into_iter().filter(|t| t.wave == Some(wave) && t.status == SubtaskStatus::Completed).collect();
        if completed_this_wave.is_empty() {
            return;
        }
        self.emit(ExecutionEvent::ReviewStart { wave });

        #[derive(Debug, Deserialize)]
        struct RawFixup {
            description: String,
            #[serde(default)]
            complexity: Option<u8>,
        }
        #[derive(Debug, Deserialize)]
        struct RawReview {
            #[serde(default)]
            fixups: Vec<RawFixup>,
        }

        let summaries: Vec<String> = completed_this_wave
            .iter()
            .map(|t| format!("- {}: {}", t.description, t.last_result.as_ref().map(|r| r.output.as_str()).unwrap_or_default()))
            .collect();
        let prompt = format!(
            "Completed work this wave:\n{}\n\nDoes anything need a follow-up fix-up task before the swarm continues? \
             Reply with JSON: {{\"fixups\": [{{\"description\": ..., \"complexity\": 1-10}}]}}. Empty list if nothing is needed.",
            summaries.join("\n")
        );

        let request = ChatRequest { model: self.config.orchestrator_model.clone(), max_tokens: 1024, temperature: 0.2 };
        let response = self.backend.chat(&[ChatMessage::system("You are a QA reviewer."), ChatMessage::user(prompt)], &request).await;

        let fixups = match response {
            Ok(r) => serde_json::from_str::<RawReview>(r.content.trim()).map(|raw| raw.fixups).unwrap_or_default(),
            Err(err) => {
                self.log_error(format!("wave review call failed: {err}"));
                Vec::new()
            }
        };

        if fixups.is_empty() {
            self.emit(ExecutionEvent::ReviewComplete { wave, fixup_tasks: 0 });
            return;
        }

        let tasks: Vec<Subtask> = fixups
            .into_iter()
            .map(|f| Subtask::new(f.description, crate::domain::subtask::TaskType::Implement, f.complexity.unwrap_or(4)))
            .collect();
        let count = tasks.len();
        self.queue.add_fixup_tasks(tasks);
        self.emit(ExecutionEvent::ReviewComplete { wave, fixup_tasks: count });
        self.log_decision(format!("wave review added {count} fix-up task(s)"));
    }

    /// Detects a stalled swarm (enough attempts made, too few succeeding) and triggers a
    /// re-plan exactly once per run.
    async fn check_for_stall(&mut self) {
        if self.has_replanned || self.aborted {
            return;
        }
        let attempted = self.queue.attempted_count();
        if attempted < STALL_MIN_ATTEMPTED {
            return;
        }
        let success_ratio = self.shared_economics.success_ratio(attempted);
        if success_ratio < STALL_SUCCESS_RATIO_THRESHOLD {
            self.emit(ExecutionEvent::Stall { attempted, success_ratio });
            self.stall_replan().await;
        }
    }

    /// Re-plans the remaining backlog: asks the orchestrator model for a fresh batch of
    /// subtasks given everything learned so far, appended into the current wave.
    pub(super) async fn stall_replan(&mut self) {
        if self.has_replanned {
            return;
        }
        self.has_replanned = true;

        let failed_models: Vec<String> = self.shared_context.all_failed_models();
        let remaining_backlog: Vec<&Subtask> = self
            .queue
            .all_tasks()
            .into_iter()
            .filter(|t| matches!(t.status, SubtaskStatus::Pending | SubtaskStatus::Ready | SubtaskStatus::Failed | SubtaskStatus::Skipped))
            .collect();
        if remaining_backlog.is_empty() {
            return;
        }

        let descriptions: Vec<String> = remaining_backlog.iter().map(|t| t.description.clone()).collect();
        let remaining_backlog_ids: Vec<Uuid> = remaining_backlog.iter().map(|t| t.id).collect();
        let prompt = format!(
            "Original task: {}\n\nThe swarm has stalled. Remaining unfinished work:\n{}\n\n\
             Models that have been failing: {:?}\n\n\
             Propose a revised, smaller set of subtasks to get this unstuck. \
             Reply with JSON: {{\"subtasks\": [{{\"description\": ..., \"depends_on\": [indices]}}]}}",
            self.original_prompt,
            descriptions.join("\n- "),
            failed_models,
        );

        let request = ChatRequest { model: self.config.orchestrator_model.clone(), max_tokens: 2048, temperature: 0.3 };
        let response = self.backend.chat(&[ChatMessage::user(prompt)], &request).await;

        let new_tasks: Vec<Subtask> = match response {
            Ok(r) => parse_replan_subtasks(&r.content),
            Err(err) => {
                self.log_error(format!("re-plan call failed: {err}"));
                Vec::new()
            }
        };

        if new_tasks.is_empty() {
            self.log_decision("stall detected but re-plan produced no new subtasks");
            return;
        }

        for id in remaining_backlog_ids {
            self.queue.trigger_cascade_skip(id);
        }

        let wave = self.queue.current_wave();
        let count = new_tasks.len();
        self.queue.add_replan_tasks(new_tasks, wave);
        self.emit(ExecutionEvent::Replan { new_task_count: count });
        self.log_decision(format!("re-planned {count} subtask(s) after a stall"));
    }
}

fn parse_replan_subtasks(content: &str) -> Vec<Subtask> {
    #[derive(Debug, Deserialize)]
    struct RawReplanSubtask {
        description: String,
        #[serde(default)]
        depends_on: Vec<usize>,
    }
    #[derive(Debug, Deserialize)]
    struct RawReplan {
        subtasks: Vec<RawReplanSubtask>,
    }

    let Ok(raw) = serde_json::from_str::<RawReplan>(content.trim()) else { return Vec::new() };
    let ids: Vec<Uuid> = raw.subtasks.iter().map(|_| Uuid::new_v4()).collect();
    raw.subtasks
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let depends_on: HashMap<usize, Uuid> = ids.iter().enumerate().map(|(j, id)| (j, *id)).collect();
            let mut task = Subtask::new(spec.description.clone(), crate::domain::subtask::TaskType::Implement, 5);
            task.id = ids[i];
            task.depends_on = spec.depends_on.iter().filter(|&&d| d != i).filter_map(|d| depends_on.get(d).copied()).collect();
            task
        })
        .collect()
}
