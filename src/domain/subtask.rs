//! The subtask data model: the unit of work the orchestrator schedules.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Type tag drawn from a fixed set, with room for user extensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    Research,
    Analysis,
    Design,
    Implement,
    Test,
    Refactor,
    Review,
    Document,
    Integrate,
    Deploy,
    Merge,
    /// User-defined extension, configured via `task_types` in `OrchestratorConfig`.
    Custom(String),
}

/// Why a dispatched task did not produce an accepted result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureMode {
    RateLimit,
    Timeout,
    Hollow,
    Quality,
    Error,
}

/// Current position of a subtask in its lifecycle.
///
/// ```text
/// pending -> ready -> dispatched -> completed
///                            \-> failed -> ready (retry) | skip cascade
///                            \-> decomposed (replaced by split/micro-split subtasks)
///  failed -> decomposed (resilience pipeline splits it after retries exhaust)
///  failed/skipped -> ready (rescue, resume)
///  failed -> completed (degraded acceptance; force-transitioned, see `force_status`)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubtaskStatus {
    Pending,
    Ready,
    Dispatched,
    Completed,
    Failed,
    Skipped,
    /// Replaced by the subtasks produced from micro-decomposing it.
    Decomposed,
}

impl SubtaskStatus {
    /// Valid next states from this state, mirroring the lifecycle diagram in the data model.
    #[must_use]
    pub fn valid_transitions(self) -> &'static [SubtaskStatus] {
        use SubtaskStatus::{Completed, Decomposed, Dispatched, Failed, Pending, Ready, Skipped};
        match self {
            Pending => &[Ready, Skipped],
            Ready => &[Dispatched, Skipped],
            Dispatched => &[Completed, Failed, Decomposed, Skipped],
            Failed => &[Ready, Skipped, Decomposed],
            Skipped => &[Ready],
            Completed | Decomposed => &[],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, next: SubtaskStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Whether this status counts as "attempted" for stall-ratio purposes.
    ///
    /// `decomposed` is treated as completed here, per the documented resolution
    /// of the open question in the data model: it is already treated as
    /// satisfying a dependency, so it should also count as forward progress.
    #[must_use]
    pub const fn counts_as_attempted(self) -> bool {
        matches!(
            self,
            SubtaskStatus::Completed
                | SubtaskStatus::Decomposed
                | SubtaskStatus::Failed
                | SubtaskStatus::Skipped
        )
    }

    /// Whether this status satisfies a dependent's wait (completed or decomposed).
    #[must_use]
    pub const fn satisfies_dependency(self) -> bool {
        matches!(self, SubtaskStatus::Completed | SubtaskStatus::Decomposed)
    }
}

/// Feedback carried into a retry attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryContext {
    pub feedback: Option<String>,
    pub previous_score: Option<u8>,
    pub previous_model: Option<String>,
    pub previous_files: Vec<String>,
    pub swarm_progress_summary: Option<String>,
    pub elapsed_seconds: Option<f64>,
}

/// Structured closure report a worker may attach to its result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClosureReport {
    pub summary: String,
    pub fields: HashMap<String, serde_json::Value>,
}

/// Outcome of dispatching a subtask to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskResult {
    pub success: bool,
    pub output: String,
    pub files_modified: Vec<String>,
    pub tokens_used: u64,
    pub cost_used: f64,
    pub duration_ms: u64,
    pub model: String,
    pub quality_score: Option<u8>,
    pub feedback: Option<String>,
    pub degraded: bool,
    pub closure_report: Option<ClosureReport>,
    /// Raw tool-call count from the spawner; `-1` (represented here as `None`) means "timed out".
    pub tool_calls: Option<i64>,
}

impl SubtaskResult {
    #[must_use]
    pub const fn timed_out(&self) -> bool {
        matches!(self.tool_calls, None)
    }
}

/// The unit of work the orchestrator schedules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: Uuid,
    pub description: String,
    pub task_type: TaskType,
    pub complexity: u8,
    pub depends_on: Vec<Uuid>,
    pub target_files: Vec<String>,
    pub read_only_files: Vec<String>,
    pub wave: Option<usize>,
    pub attempts: u32,
    pub status: SubtaskStatus,
    pub assigned_model: Option<String>,
    pub last_result: Option<SubtaskResult>,
    pub retry_context: Option<RetryContext>,
    pub foundation: bool,
    pub degraded: bool,
    pub pending_cascade_skip: bool,
    pub failure_mode: Option<FailureMode>,
    pub consecutive_timeouts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subtask {
    #[must_use]
    pub fn new(description: impl Into<String>, task_type: TaskType, complexity: u8) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            task_type,
            complexity: complexity.clamp(1, 10),
            depends_on: Vec::new(),
            target_files: Vec::new(),
            read_only_files: Vec::new(),
            wave: None,
            attempts: 0,
            status: SubtaskStatus::Pending,
            assigned_model: None,
            last_result: None,
            retry_context: None,
            foundation: false,
            degraded: false,
            pending_cascade_skip: false,
            failure_mode: None,
            consecutive_timeouts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_dependencies(mut self, depends_on: Vec<Uuid>) -> Self {
        self.depends_on = depends_on;
        self
    }

    #[must_use]
    pub fn with_target_files(mut self, files: Vec<String>) -> Self {
        self.target_files = files;
        self
    }

    /// Validated state transition. Returns `InvalidStateTransition` instead of mutating on
    /// an illegal edge, mirroring the queue's role as the sole serialization point for status
    /// changes.
    pub fn transition_to(&mut self, next: SubtaskStatus) -> OrchestratorResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(OrchestratorError::InvalidStateTransition {
                from: format!("{:?}", self.status),
                to: format!("{next:?}"),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Bypasses transition validation. Used only by resume/rescue paths that must move a
    /// task into a state its current status would not normally permit (e.g. resetting an
    /// orphaned `dispatched` task straight back to `ready`).
    pub fn force_status(&mut self, next: SubtaskStatus, reason: &str) {
        tracing::warn!(task_id = %self.id, from = ?self.status, to = ?next, reason, "forced subtask status transition");
        self.status = next;
        self.updated_at = Utc::now();
    }

    #[must_use]
    pub fn can_retry(&self, retry_limit: u32) -> bool {
        let limit = if self.foundation { retry_limit + 1 } else { retry_limit };
        self.attempts < limit
    }

    /// Effective quality threshold for this task: relaxed by one point (floor 2) for
    /// foundation tasks.
    #[must_use]
    pub fn quality_threshold(&self, configured: u8) -> u8 {
        if self.foundation {
            configured.saturating_sub(1).max(2)
        } else {
            configured
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_subtask_starts_pending() {
        let t = Subtask::new("do a thing", TaskType::Implement, 5);
        assert_eq!(t.status, SubtaskStatus::Pending);
        assert_eq!(t.attempts, 0);
    }

    #[test]
    fn complexity_is_clamped() {
        let t = Subtask::new("x", TaskType::Implement, 99);
        assert_eq!(t.complexity, 10);
        let t = Subtask::new("x", TaskType::Implement, 0);
        assert_eq!(t.complexity, 1);
    }

    #[test]
    fn valid_transition_succeeds() {
        let mut t = Subtask::new("x", TaskType::Implement, 3);
        assert!(t.transition_to(SubtaskStatus::Ready).is_ok());
        assert!(t.transition_to(SubtaskStatus::Dispatched).is_ok());
        assert!(t.transition_to(SubtaskStatus::Completed).is_ok());
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut t = Subtask::new("x", TaskType::Implement, 3);
        let err = t.transition_to(SubtaskStatus::Completed).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition { .. }));
        assert_eq!(t.status, SubtaskStatus::Pending);
    }

    #[test]
    fn failed_task_can_be_decomposed_by_the_resilience_pipeline() {
        assert!(SubtaskStatus::Failed.can_transition_to(SubtaskStatus::Decomposed));
    }

    #[test]
    fn terminal_states_have_no_transitions() {
        assert!(SubtaskStatus::Completed.valid_transitions().is_empty());
        assert!(SubtaskStatus::Decomposed.valid_transitions().is_empty());
    }

    #[test]
    fn force_status_bypasses_validation() {
        let mut t = Subtask::new("x", TaskType::Implement, 3);
        t.transition_to(SubtaskStatus::Ready).unwrap();
        t.transition_to(SubtaskStatus::Dispatched).unwrap();
        // Dispatched -> Ready is not a normal edge; only resume/rescue force it.
        assert!(!SubtaskStatus::Dispatched.can_transition_to(SubtaskStatus::Ready));
        t.force_status(SubtaskStatus::Ready, "orphaned dispatch on resume");
        assert_eq!(t.status, SubtaskStatus::Ready);
    }

    #[test]
    fn foundation_task_gets_extra_retry_and_relaxed_threshold() {
        let mut t = Subtask::new("x", TaskType::Implement, 3);
        t.foundation = true;
        t.attempts = 2;
        assert!(t.can_retry(2));
        assert!(!Subtask::new("y", TaskType::Implement, 3).can_retry(2));
        assert_eq!(t.quality_threshold(3), 2);
        assert_eq!(t.quality_threshold(2), 2);
    }

    #[test]
    fn decomposed_counts_as_attempted_and_satisfies_dependency() {
        assert!(SubtaskStatus::Decomposed.counts_as_attempted());
        assert!(SubtaskStatus::Decomposed.satisfies_dependency());
        assert!(!SubtaskStatus::Ready.counts_as_attempted());
    }

    #[test]
    fn timed_out_result_has_no_tool_calls() {
        let r = SubtaskResult {
            success: false,
            output: String::new(),
            files_modified: vec![],
            tokens_used: 0,
            cost_used: 0.0,
            duration_ms: 0,
            model: "haiku".into(),
            quality_score: None,
            feedback: None,
            degraded: false,
            closure_report: None,
            tool_calls: None,
        };
        assert!(r.timed_out());
    }
}
