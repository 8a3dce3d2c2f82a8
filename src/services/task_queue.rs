//! DAG storage, wave construction, subtask state transitions, cascade-skip and rescue.
//!
//! The queue is the sole serialization point for subtask status changes (design note in
//! every mutation goes through one of its methods rather than callers poking at
//! `Subtask::status` directly.

use std::collections::HashMap;

use uuid::Uuid;

use crate::domain::checkpoint::{AggregatedStats, QueueSnapshot};
use crate::domain::dag::{self, foundation_task_ids};
use crate::domain::decomposition::DecompositionResult;
use crate::domain::subtask::{Subtask, SubtaskResult, SubtaskStatus};
use crate::error::{OrchestratorError, OrchestratorResult};

/// Configuration the queue needs at load time.
#[derive(Debug, Clone)]
pub struct QueueLoadConfig {
    pub worker_retries: u32,
}

/// DAG-backed store of all subtasks in the current swarm.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: HashMap<Uuid, Subtask>,
    wave_of: HashMap<Uuid, usize>,
    current_wave: usize,
    max_wave: usize,
}

impl TaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a freshly-decomposed DAG, computing wave indices and flagging foundation
    /// tasks.
    pub fn load_from_decomposition(
        &mut self,
        mut decomposition: DecompositionResult,
        _config: &QueueLoadConfig,
    ) -> OrchestratorResult<()> {
        let foundations = foundation_task_ids(&decomposition.subtasks);
        let waves = dag::compute_waves(&decomposition.subtasks)?;

        for task in &mut decomposition.subtasks {
            task.foundation = foundations.contains(&task.id);
            task.wave = Some(waves[&task.id]);
            if task.depends_on.is_empty() {
                task.status = SubtaskStatus::Ready;
            }
        }

        self.max_wave = waves.values().copied().max().unwrap_or(0);
        self.current_wave = 0;
        self.wave_of = waves;
        self.tasks = decomposition.subtasks.into_iter().map(|t| (t.id, t)).collect();
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&Subtask> {
        self.tasks.get(&id)
    }

    #[must_use]
    pub fn current_wave(&self) -> usize {
        self.current_wave
    }

    /// Tasks in the current wave whose dependencies are all satisfied.
    #[must_use]
    pub fn get_ready_tasks(&self) -> Vec<&Subtask> {
        self.tasks
            .values()
            .filter(|t| {
                self.wave_of.get(&t.id) == Some(&self.current_wave)
                    && t.status == SubtaskStatus::Ready
                    && self.dependencies_satisfied(t)
            })
            .collect()
    }

    /// Ready tasks across all waves, used for slot-filling when the current wave is thin.
    #[must_use]
    pub fn get_all_ready_tasks(&self) -> Vec<&Subtask> {
        self.tasks
            .values()
            .filter(|t| t.status == SubtaskStatus::Ready && self.dependencies_satisfied(t))
            .collect()
    }

    fn dependencies_satisfied(&self, task: &Subtask) -> bool {
        task.depends_on.iter().all(|dep_id| {
            self.tasks.get(dep_id).is_some_and(|dep| dep.status.satisfies_dependency())
        })
    }

    /// Promotes every `pending` task whose dependencies are now satisfied to `ready`.
    /// Called after anything that can complete or decompose a task, since either outcome
    /// can unblock a dependent sitting in a later wave.
    fn promote_ready_dependents(&mut self) {
        let to_promote: Vec<Uuid> = self
            .tasks
            .values()
            .filter(|t| t.status == SubtaskStatus::Pending && self.dependencies_satisfied(t))
            .map(|t| t.id)
            .collect();
        for id in to_promote {
            if let Some(task) = self.tasks.get_mut(&id) {
                let _ = task.transition_to(SubtaskStatus::Ready);
            }
        }
    }

    pub fn mark_dispatched(&mut self, id: Uuid, model: &str) -> OrchestratorResult<()> {
        let task = self.tasks.get_mut(&id).ok_or(OrchestratorError::TaskNotFound(id))?;
        task.transition_to(SubtaskStatus::Dispatched)?;
        task.attempts += 1;
        task.assigned_model = Some(model.to_string());
        Ok(())
    }

    pub fn mark_completed(&mut self, id: Uuid, result: SubtaskResult) -> OrchestratorResult<()> {
        let task = self.tasks.get_mut(&id).ok_or(OrchestratorError::TaskNotFound(id))?;
        task.degraded = result.degraded;
        task.last_result = Some(result);
        task.transition_to(SubtaskStatus::Completed)?;
        self.promote_ready_dependents();
        Ok(())
    }

    /// Force-completes a task that failed review but was rescued by degraded acceptance.
    /// The task is not necessarily in `dispatched` (retries may have exhausted it into
    /// `failed`), so this bypasses normal transition validation the way resume/rescue do.
    pub fn accept_degraded(&mut self, id: Uuid, result: SubtaskResult) -> OrchestratorResult<()> {
        let task = self.tasks.get_mut(&id).ok_or(OrchestratorError::TaskNotFound(id))?;
        task.degraded = result.degraded;
        task.last_result = Some(result);
        task.force_status(SubtaskStatus::Completed, "degraded acceptance");
        self.promote_ready_dependents();
        Ok(())
    }

    /// Records diagnostic context (failure mode, consecutive-timeout count, last result)
    /// ahead of marking a task failed. A no-op if `id` is unknown.
    pub fn record_failure_context(&mut self, id: Uuid, mode: crate::domain::subtask::FailureMode, result: Option<SubtaskResult>) {
        if let Some(task) = self.tasks.get_mut(&id) {
            task.failure_mode = Some(mode);
            task.consecutive_timeouts =
                if mode == crate::domain::subtask::FailureMode::Timeout { task.consecutive_timeouts + 1 } else { 0 };
            if let Some(r) = result {
                task.last_result = Some(r);
            }
        }
    }

    /// Attaches retry context (feedback, previous model/score/files) ahead of a retry
    /// dispatch. A no-op if `id` is unknown.
    pub fn set_retry_context(&mut self, id: Uuid, ctx: crate::domain::subtask::RetryContext) {
        if let Some(task) = self.tasks.get_mut(&id) {
            task.retry_context = Some(ctx);
        }
    }

    /// Marks a task failed without cascading to dependents. Returns `true` if a retry
    /// slot remains (status becomes `ready` again), `false` if retries are exhausted
    /// (status becomes `failed`, terminal until rescued).
    pub fn mark_failed_without_cascade(&mut self, id: Uuid, retry_limit: u32) -> OrchestratorResult<bool> {
        let task = self.tasks.get_mut(&id).ok_or(OrchestratorError::TaskNotFound(id))?;
        task.transition_to(SubtaskStatus::Failed)?;
        if task.can_retry(retry_limit) {
            task.transition_to(SubtaskStatus::Ready)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Marks all transitive descendants of `id` as skipped, except any currently
    /// dispatched descendant, which instead records `pending_cascade_skip = true`.
    pub fn trigger_cascade_skip(&mut self, id: Uuid) {
        let all_tasks: Vec<Subtask> = self.tasks.values().cloned().collect();
        let descendants = dag::transitive_dependents(id, &all_tasks);
        for descendant_id in descendants {
            if let Some(task) = self.tasks.get_mut(&descendant_id) {
                if task.status == SubtaskStatus::Completed {
                    continue;
                }
                if task.status == SubtaskStatus::Dispatched {
                    task.pending_cascade_skip = true;
                } else if task.status.can_transition_to(SubtaskStatus::Skipped) {
                    let _ = task.transition_to(SubtaskStatus::Skipped);
                }
            }
        }
    }

    /// Called when a dispatched task with `pending_cascade_skip` produces a result: if
    /// pre-flight passed (`output_is_acceptable`), the pending flag is cleared and the
    /// caller should proceed to complete it normally; otherwise the skip is honored.
    pub fn resolve_pending_cascade_skip(&mut self, id: Uuid, output_is_acceptable: bool) -> OrchestratorResult<bool> {
        let task = self.tasks.get_mut(&id).ok_or(OrchestratorError::TaskNotFound(id))?;
        if !task.pending_cascade_skip {
            return Ok(true);
        }
        if output_is_acceptable {
            task.pending_cascade_skip = false;
            Ok(true)
        } else {
            task.transition_to(SubtaskStatus::Skipped)?;
            Ok(false)
        }
    }

    /// Advances to the next wave. Returns `false` once the last wave has been passed.
    pub fn advance_wave(&mut self) -> bool {
        self.promote_ready_dependents();
        if self.current_wave >= self.max_wave {
            return false;
        }
        self.current_wave += 1;
        true
    }

    /// Appends fix-up tasks produced by wave review, wiring their dependencies against
    /// live ids and placing them in the current wave.
    pub fn add_fixup_tasks(&mut self, tasks: Vec<Subtask>) {
        for mut task in tasks {
            self.wave_of.insert(task.id, self.current_wave);
            task.wave = Some(self.current_wave);
            if task.depends_on.is_empty() || self.dependencies_satisfied(&task) {
                task.status = SubtaskStatus::Ready;
            }
            self.tasks.insert(task.id, task);
        }
    }

    /// Appends re-plan tasks into a specific wave.
    pub fn add_replan_tasks(&mut self, tasks: Vec<Subtask>, wave: usize) {
        self.max_wave = self.max_wave.max(wave);
        for mut task in tasks {
            self.wave_of.insert(task.id, wave);
            task.wave = Some(wave);
            if task.depends_on.is_empty() || self.dependencies_satisfied(&task) {
                task.status = SubtaskStatus::Ready;
            }
            self.tasks.insert(task.id, task);
        }
    }

    /// Marks `id` decomposed and splices `subtasks` into the graph, rewiring every
    /// dependent of `id` to depend on all leaves of `subtasks` (subtasks with no
    /// dependent within the replacement set).
    pub fn replace_with_subtasks(&mut self, id: Uuid, mut subtasks: Vec<Subtask>) -> OrchestratorResult<()> {
        let original_wave = self.wave_of.get(&id).copied().unwrap_or(0);
        {
            let original = self.tasks.get_mut(&id).ok_or(OrchestratorError::TaskNotFound(id))?;
            original.transition_to(SubtaskStatus::Decomposed)?;
        }

        let new_ids: Vec<Uuid> = subtasks.iter().map(|t| t.id).collect();
        let leaves: Vec<Uuid> = subtasks
            .iter()
            .filter(|t| !subtasks.iter().any(|other| other.depends_on.contains(&t.id)))
            .map(|t| t.id)
            .collect();

        for (offset, task) in subtasks.iter_mut().enumerate() {
            let wave = original_wave + offset.min(1);
            self.wave_of.insert(task.id, wave);
            task.wave = Some(wave);
            if task.depends_on.is_empty() {
                task.status = SubtaskStatus::Ready;
            }
        }
        for task in subtasks {
            self.tasks.insert(task.id, task);
        }

        let dependents: Vec<Uuid> = self
            .tasks
            .values()
            .filter(|t| t.depends_on.contains(&id))
            .map(|t| t.id)
            .collect();
        for dependent_id in dependents {
            if let Some(dependent) = self.tasks.get_mut(&dependent_id) {
                dependent.depends_on.retain(|d| *d != id);
                for &leaf in &leaves {
                    if !dependent.depends_on.contains(&leaf) {
                        dependent.depends_on.push(leaf);
                    }
                }
            }
        }
        let _ = new_ids;
        self.promote_ready_dependents();
        Ok(())
    }

    /// Moves a skipped task back to ready, provided its dependencies are now satisfied.
    pub fn rescue_task(&mut self, id: Uuid, reason: &str) -> OrchestratorResult<bool> {
        let satisfied = {
            let task = self.tasks.get(&id).ok_or(OrchestratorError::TaskNotFound(id))?;
            if task.status != SubtaskStatus::Skipped {
                return Ok(false);
            }
            self.dependencies_satisfied(task)
        };
        if !satisfied {
            return Ok(false);
        }
        let task = self.tasks.get_mut(&id).ok_or(OrchestratorError::TaskNotFound(id))?;
        task.force_status(SubtaskStatus::Ready, reason);
        Ok(true)
    }

    /// Resets any task stuck in `dispatched` back to `ready` (their worker died with a
    /// prior process) and un-skips tasks whose dependencies are now satisfied and failed
    /// tasks with remaining retry budget. Returns the number of orphaned dispatches reset.
    pub fn reset_orphans_on_resume(&mut self, retry_limit: u32) -> usize {
        let mut reset_count = 0;
        let ids: Vec<Uuid> = self.tasks.keys().copied().collect();
        for id in ids {
            let task = self.tasks.get(&id).unwrap();
            match task.status {
                SubtaskStatus::Dispatched => {
                    let task = self.tasks.get_mut(&id).unwrap();
                    task.attempts = task.attempts.saturating_sub(1);
                    task.force_status(SubtaskStatus::Ready, "orphaned dispatch reset on resume");
                    reset_count += 1;
                }
                SubtaskStatus::Failed if task.can_retry(retry_limit) => {
                    self.tasks.get_mut(&id).unwrap().force_status(SubtaskStatus::Ready, "resume retry");
                }
                SubtaskStatus::Skipped => {
                    let _ = self.rescue_task(id, "resume: dependencies now satisfied");
                }
                _ => {}
            }
        }
        reset_count
    }

    #[must_use]
    pub fn stats(&self) -> AggregatedStats {
        let mut stats = AggregatedStats { total: self.tasks.len(), ..Default::default() };
        for task in self.tasks.values() {
            match task.status {
                SubtaskStatus::Pending => stats.pending += 1,
                SubtaskStatus::Ready => stats.ready += 1,
                SubtaskStatus::Dispatched => stats.dispatched += 1,
                SubtaskStatus::Completed => stats.completed += 1,
                SubtaskStatus::Failed => stats.failed += 1,
                SubtaskStatus::Skipped => stats.skipped += 1,
                SubtaskStatus::Decomposed => stats.decomposed += 1,
            }
        }
        stats
    }

    #[must_use]
    pub fn attempted_count(&self) -> usize {
        self.tasks.values().filter(|t| t.status.counts_as_attempted()).count()
    }

    /// Ids of every currently-skipped task, for the lenient final rescue pass.
    #[must_use]
    pub fn skipped_task_ids(&self) -> Vec<Uuid> {
        self.tasks.values().filter(|t| t.status == SubtaskStatus::Skipped).map(|t| t.id).collect()
    }

    /// Every completed task paired with its accepted result, for synthesis.
    #[must_use]
    pub fn completed_with_results(&self) -> Vec<(&Subtask, &SubtaskResult)> {
        self.tasks
            .values()
            .filter(|t| t.status == SubtaskStatus::Completed)
            .filter_map(|t| t.last_result.as_ref().map(|r| (t, r)))
            .collect()
    }

    /// All current tasks, for building a checkpoint or inspecting swarm-wide state.
    #[must_use]
    pub fn all_tasks(&self) -> Vec<&Subtask> {
        self.tasks.values().collect()
    }

    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        let mut wave_membership: HashMap<usize, Vec<Uuid>> = HashMap::new();
        for (&id, &wave) in &self.wave_of {
            wave_membership.entry(wave).or_default().push(id);
        }
        QueueSnapshot {
            tasks: self.tasks.values().cloned().collect(),
            current_wave: self.current_wave,
            wave_membership,
        }
    }

    pub fn restore(&mut self, snapshot: QueueSnapshot) {
        self.current_wave = snapshot.current_wave;
        self.max_wave = snapshot.wave_membership.keys().copied().max().unwrap_or(0);
        self.wave_of = snapshot
            .wave_membership
            .iter()
            .flat_map(|(&wave, ids)| ids.iter().map(move |&id| (id, wave)))
            .collect();
        self.tasks = snapshot.tasks.into_iter().map(|t| (t.id, t)).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decomposition::{DecompositionMetadata, DecompositionStrategy};
    use crate::domain::subtask::TaskType;

    fn decomposition(tasks: Vec<Subtask>) -> DecompositionResult {
        DecompositionResult {
            subtasks: tasks,
            strategy: DecompositionStrategy::Adaptive,
            reasoning: String::new(),
            metadata: DecompositionMetadata::default(),
        }
    }

    fn config() -> QueueLoadConfig {
        QueueLoadConfig { worker_retries: 2 }
    }

    #[test]
    fn load_computes_waves_and_marks_roots_ready() {
        let a = Subtask::new("a", TaskType::Research, 1);
        let b = Subtask::new("b", TaskType::Research, 1).with_dependencies(vec![a.id]);
        let mut queue = TaskQueue::new();
        queue.load_from_decomposition(decomposition(vec![a.clone(), b.clone()]), &config()).unwrap();

        assert_eq!(queue.get(a.id).unwrap().status, SubtaskStatus::Ready);
        assert_eq!(queue.get(b.id).unwrap().status, SubtaskStatus::Pending);
        assert_eq!(queue.get_ready_tasks().len(), 1);
    }

    #[test]
    fn mark_completed_unblocks_dependent_in_next_wave() {
        let a = Subtask::new("a", TaskType::Research, 1);
        let b = Subtask::new("b", TaskType::Research, 1).with_dependencies(vec![a.id]);
        let mut queue = TaskQueue::new();
        queue.load_from_decomposition(decomposition(vec![a.clone(), b.clone()]), &config()).unwrap();

        queue.mark_dispatched(a.id, "haiku").unwrap();
        queue
            .mark_completed(
                a.id,
                SubtaskResult {
                    success: true,
                    output: "done".into(),
                    files_modified: vec![],
                    tokens_used: 10,
                    cost_used: 0.01,
                    duration_ms: 100,
                    model: "haiku".into(),
                    quality_score: Some(4),
                    feedback: None,
                    degraded: false,
                    closure_report: None,
                    tool_calls: Some(1),
                },
            )
            .unwrap();
        assert_eq!(queue.get(b.id).unwrap().status, SubtaskStatus::Ready, "completing a's dependency should promote b to ready");
        queue.advance_wave();
        assert_eq!(queue.get_ready_tasks().len(), 1);
        assert_eq!(queue.get_ready_tasks()[0].id, b.id);
    }

    #[test]
    fn cascade_skip_does_not_reach_completed_tasks() {
        let a = Subtask::new("a", TaskType::Research, 1);
        let b = Subtask::new("b", TaskType::Research, 1).with_dependencies(vec![a.id]);
        let mut queue = TaskQueue::new();
        queue.load_from_decomposition(decomposition(vec![a.clone(), b.clone()]), &config()).unwrap();
        queue.tasks.get_mut(&b.id).unwrap().status = SubtaskStatus::Completed;

        queue.trigger_cascade_skip(a.id);
        assert_eq!(queue.get(b.id).unwrap().status, SubtaskStatus::Completed);
    }

    #[test]
    fn cascade_skip_marks_dispatched_descendant_pending_instead_of_skipped() {
        let a = Subtask::new("a", TaskType::Research, 1);
        let b = Subtask::new("b", TaskType::Research, 1).with_dependencies(vec![a.id]);
        let mut queue = TaskQueue::new();
        queue.load_from_decomposition(decomposition(vec![a.clone(), b.clone()]), &config()).unwrap();
        queue.tasks.get_mut(&b.id).unwrap().status = SubtaskStatus::Dispatched;

        queue.trigger_cascade_skip(a.id);
        let b = queue.get(b.id).unwrap();
        assert_eq!(b.status, SubtaskStatus::Dispatched);
        assert!(b.pending_cascade_skip);
    }

    #[test]
    fn pending_cascade_skip_honored_on_unacceptable_output() {
        let a = Subtask::new("a", TaskType::Research, 1);
        let mut queue = TaskQueue::new();
        queue.load_from_decomposition(decomposition(vec![a.clone()]), &config()).unwrap();
        queue.tasks.get_mut(&a.id).unwrap().status = SubtaskStatus::Dispatched;
        queue.tasks.get_mut(&a.id).unwrap().pending_cascade_skip = true;

        let proceeds = queue.resolve_pending_cascade_skip(a.id, false).unwrap();
        assert!(!proceeds);
        assert_eq!(queue.get(a.id).unwrap().status, SubtaskStatus::Skipped);
    }

    #[test]
    fn pending_cascade_skip_overridden_by_acceptable_output() {
        let a = Subtask::new("a", TaskType::Research, 1);
        let mut queue = TaskQueue::new();
        queue.load_from_decomposition(decomposition(vec![a.clone()]), &config()).unwrap();
        queue.tasks.get_mut(&a.id).unwrap().status = SubtaskStatus::Dispatched;
        queue.tasks.get_mut(&a.id).unwrap().pending_cascade_skip = true;

        let proceeds = queue.resolve_pending_cascade_skip(a.id, true).unwrap();
        assert!(proceeds);
        assert!(!queue.get(a.id).unwrap().pending_cascade_skip);
    }

    #[test]
    fn replace_with_subtasks_rewires_dependents_to_leaves() {
        let a = Subtask::new("a", TaskType::Implement, 8);
        let dependent = Subtask::new("dependent", TaskType::Test, 2).with_dependencies(vec![a.id]);
        let mut queue = TaskQueue::new();
        queue.load_from_decomposition(decomposition(vec![a.clone(), dependent.clone()]), &config()).unwrap();

        let sub1 = Subtask::new("sub1", TaskType::Implement, 4);
        let sub2 = Subtask::new("sub2", TaskType::Implement, 4).with_dependencies(vec![sub1.id]);
        queue.replace_with_subtasks(a.id, vec![sub1.clone(), sub2.clone()]).unwrap();

        assert_eq!(queue.get(a.id).unwrap().status, SubtaskStatus::Decomposed);
        let dependent = queue.get(dependent.id).unwrap();
        assert!(!dependent.depends_on.contains(&a.id));
        assert!(dependent.depends_on.contains(&sub2.id));
        assert!(!dependent.depends_on.contains(&sub1.id));
    }

    #[test]
    fn accept_degraded_completes_a_failed_task_and_unblocks_dependents() {
        let a = Subtask::new("a", TaskType::Research, 1);
        let b = Subtask::new("b", TaskType::Research, 1).with_dependencies(vec![a.id]);
        let mut queue = TaskQueue::new();
        queue.load_from_decomposition(decomposition(vec![a.clone(), b.clone()]), &config()).unwrap();
        queue.mark_dispatched(a.id, "haiku").unwrap();
        queue.mark_failed_without_cascade(a.id, 0).unwrap();
        assert_eq!(queue.get(a.id).unwrap().status, SubtaskStatus::Failed);

        queue
            .accept_degraded(
                a.id,
                SubtaskResult {
                    success: true,
                    output: "partial".into(),
                    files_modified: vec![],
                    tokens_used: 5,
                    cost_used: 0.0,
                    duration_ms: 10,
                    model: "haiku".into(),
                    quality_score: Some(2),
                    feedback: None,
                    degraded: true,
                    closure_report: None,
                    tool_calls: Some(1),
                },
            )
            .unwrap();

        assert_eq!(queue.get(a.id).unwrap().status, SubtaskStatus::Completed);
        assert!(queue.get(a.id).unwrap().degraded);
        assert_eq!(queue.get(b.id).unwrap().status, SubtaskStatus::Ready);
    }

    #[test]
    fn mark_failed_without_cascade_returns_true_while_retries_remain() {
        let a = Subtask::new("a", TaskType::Research, 1);
        let mut queue = TaskQueue::new();
        queue.load_from_decomposition(decomposition(vec![a.clone()]), &config()).unwrap();
        queue.mark_dispatched(a.id, "haiku").unwrap();
        let can_retry = queue.mark_failed_without_cascade(a.id, 2).unwrap();
        assert!(can_retry);
        assert_eq!(queue.get(a.id).unwrap().status, SubtaskStatus::Ready);
    }

    #[test]
    fn mark_failed_without_cascade_stops_at_retry_limit() {
        let a = Subtask::new("a", TaskType::Research, 1);
        let mut queue = TaskQueue::new();
        queue.load_from_decomposition(decomposition(vec![a.clone()]), &config()).unwrap();
        for _ in 0..2 {
            queue.mark_dispatched(a.id, "haiku").unwrap();
            queue.mark_failed_without_cascade(a.id, 2).unwrap();
        }
        queue.mark_dispatched(a.id, "haiku").unwrap();
        let can_retry = queue.mark_failed_without_cascade(a.id, 2).unwrap();
        assert!(!can_retry);
        assert_eq!(queue.get(a.id).unwrap().status, SubtaskStatus::Failed);
    }

    #[test]
    fn rescue_rejects_when_dependencies_unsatisfied() {
        let a = Subtask::new("a", TaskType::Research, 1);
        let b = Subtask::new("b", TaskType::Research, 1).with_dependencies(vec![a.id]);
        let mut queue = TaskQueue::new();
        queue.load_from_decomposition(decomposition(vec![a.clone(), b.clone()]), &config()).unwrap();
        queue.tasks.get_mut(&b.id).unwrap().status = SubtaskStatus::Skipped;

        let rescued = queue.rescue_task(b.id, "test").unwrap();
        assert!(!rescued);
        assert_eq!(queue.get(b.id).unwrap().status, SubtaskStatus::Skipped);
    }

    #[test]
    fn resume_resets_orphaned_dispatched_tasks() {
        let a = Subtask::new("a", TaskType::Research, 1);
        let mut queue = TaskQueue::new();
        queue.load_from_decomposition(decomposition(vec![a.clone()]), &config()).unwrap();
        queue.mark_dispatched(a.id, "haiku").unwrap();

        let reset = queue.reset_orphans_on_resume(2);
        assert_eq!(reset, 1);
        assert_eq!(queue.get(a.id).unwrap().status, SubtaskStatus::Ready);
    }

    #[test]
    fn snapshot_round_trip_preserves_total_count() {
        let a = Subtask::new("a", TaskType::Research, 1);
        let b = Subtask::new("b", TaskType::Research, 1).with_dependencies(vec![a.id]);
        let mut queue = TaskQueue::new();
        queue.load_from_decomposition(decomposition(vec![a.clone(), b.clone()]), &config()).unwrap();

        let before = queue.stats().total;
        let snapshot = queue.snapshot();
        let mut restored = TaskQueue::new();
        restored.restore(snapshot);
        assert_eq!(restored.stats().total, before);
    }
}
