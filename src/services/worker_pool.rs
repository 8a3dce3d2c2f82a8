//! Bounded concurrent dispatch to a pool of heterogeneous model-backed workers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use uuid::Uuid;

use crate::domain::subtask::{Subtask, SubtaskResult, TaskType};
use crate::ports::spawner::{RetryHints, SpawnResult, WorkerSpawner};
use crate::services::health_tracker::HealthTracker;

/// Required capability for a task, derived from its type.
#[must_use]
pub fn required_capability(task_type: &TaskType) -> String {
    match task_type {
        TaskType::Research => "research".into(),
        TaskType::Analysis => "analysis".into(),
        TaskType::Design => "design".into(),
        TaskType::Implement => "implement".into(),
        TaskType::Test => "test".into(),
        TaskType::Refactor => "refactor".into(),
        TaskType::Review => "review".into(),
        TaskType::Document => "document".into(),
        TaskType::Integrate => "integrate".into(),
        TaskType::Deploy => "deploy".into(),
        TaskType::Merge => "merge".into(),
        TaskType::Custom(name) => name.clone(),
    }
}

/// A (name, model, capability-set, allowed-tools, policy-profile) record.
#[derive(Debug, Clone)]
pub struct Worker {
    pub name: String,
    pub model: String,
    pub capabilities: HashSet<String>,
    pub allowed_tools: Vec<String>,
    pub policy_profile: String,
    pub context_window: Option<u32>,
}

impl Worker {
    #[must_use]
    pub fn new(name: impl Into<String>, model: impl Into<String>, capabilities: &[&str]) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            capabilities: capabilities.iter().map(|s| (*s).to_string()).collect(),
            allowed_tools: Vec::new(),
            policy_profile: "default".into(),
            context_window: None,
        }
    }
}

/// Hollow-rate insensitivity band: workers whose hollow rates differ by less than this
/// are considered tied on that criterion.
const HOLLOW_RATE_INSENSITIVITY_BAND: f64 = 0.15;

/// Ranks `candidates` by health (healthy first), then hollow rate (lower first, with an
/// insensitivity band), then success rate (higher first), then returns the caller-supplied
/// index modulo the size of the resulting top tier for deterministic round-robin.
#[must_use]
pub fn select_worker<'a>(
    task: &Subtask,
    workers: &'a [Worker],
    health: &HealthTracker,
    round_robin_index: usize,
) -> Option<&'a Worker> {
    let capability = required_capability(&task.task_type);
    let mut candidates: Vec<&Worker> = workers.iter().filter(|w| w.capabilities.contains(&capability)).collect();
    if candidates.is_empty() {
        return None;
    }

    candidates.sort_by(|a, b| {
        let a_healthy = health.is_healthy(&a.model);
        let b_healthy = health.is_healthy(&b.model);
        if a_healthy != b_healthy {
            return b_healthy.cmp(&a_healthy);
        }
        let a_hollow = health.hollow_rate(&a.model);
        let b_hollow = health.hollow_rate(&b.model);
        if (a_hollow - b_hollow).abs() > HOLLOW_RATE_INSENSITIVITY_BAND {
            return a_hollow.partial_cmp(&b_hollow).unwrap_or(std::cmp::Ordering::Equal);
        }
        let a_success = health.success_rate(&a.model);
        let b_success = health.success_rate(&b.model);
        b_success.partial_cmp(&a_success).unwrap_or(std::cmp::Ordering::Equal)
    });

    // Top tier: workers tied with the best candidate on health and within the hollow-rate band.
    let best = candidates[0];
    let best_healthy = health.is_healthy(&best.model);
    let best_hollow = health.hollow_rate(&best.model);
    let top_tier: Vec<&Worker> = candidates
        .iter()
        .filter(|w| health.is_healthy(&w.model) == best_healthy && (health.hollow_rate(&w.model) - best_hollow).abs() <= HOLLOW_RATE_INSENSITIVITY_BAND)
        .copied()
        .collect();

    top_tier.get(round_robin_index % top_tier.len()).copied()
}

/// Result of a single worker dispatch, as delivered through `wait_for_any`.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub task_id: Uuid,
    pub spawn_result: anyhow::Result<SpawnResult>,
    pub started_at: Instant,
    pub duration: Duration,
}

/// Bounded concurrent worker dispatcher.
pub struct WorkerPool {
    spawner: Arc<dyn WorkerSpawner>,
    max_concurrency: usize,
    in_flight: JoinSet<DispatchOutcome>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(spawner: Arc<dyn WorkerSpawner>, max_concurrency: usize) -> Self {
        Self { spawner, max_concurrency, in_flight: JoinSet::new() }
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.max_concurrency.saturating_sub(self.active_count())
    }

    /// Non-blocking: spawns the dispatch as a separately scheduled unit.
    pub fn dispatch(&mut self, task: Subtask, worker: Worker, prompt: String, retry_hints: Option<RetryHints>) {
        let spawner = Arc::clone(&self.spawner);
        let task_id = task.id;
        self.in_flight.spawn(async move {
            let started_at = Instant::now();
            let spawn_result = spawner.spawn(&worker.name, &prompt, retry_hints.as_ref()).await;
            DispatchOutcome { task_id, spawn_result, started_at, duration: started_at.elapsed() }
        });
    }

    /// Awaits the next worker to complete, or `None` if nothing is in flight.
    pub async fn wait_for_any(&mut self) -> Option<DispatchOutcome> {
        loop {
            let joined = self.in_flight.join_next().await?;
            match joined {
                Ok(outcome) => return Some(outcome),
                Err(join_err) if join_err.is_cancelled() => continue,
                Err(join_err) => {
                    tracing::error!(%join_err, "worker task panicked");
                    continue;
                }
            }
        }
    }

    pub fn cancel_all(&mut self) {
        self.in_flight.abort_all();
    }

    #[must_use]
    pub fn to_task_result(spawn_result: &anyhow::Result<SpawnResult>, model: &str, duration: Duration) -> SubtaskResult {
        match spawn_result {
            Ok(spawn) => SubtaskResult {
                success: spawn.success,
                output: spawn.output.clone(),
                files_modified: spawn.metrics.files_modified.clone().unwrap_or_default(),
                tokens_used: spawn.metrics.tokens,
                cost_used: 0.0,
                duration_ms: duration.as_millis() as u64,
                model: model.to_string(),
                quality_score: None,
                feedback: None,
                degraded: false,
                closure_report: None,
                tool_calls: spawn.metrics.tool_calls,
            },
            Err(err) => SubtaskResult {
                success: false,
                output: err.to_string(),
                files_modified: vec![],
                tokens_used: 0,
                cost_used: 0.0,
                duration_ms: duration.as_millis() as u64,
                model: model.to_string(),
                quality_score: None,
                feedback: Some(err.to_string()),
                degraded: false,
                closure_report: None,
                // Zero, not the `None` timeout sentinel: a dispatch error is not a timeout,
                // and without real tool-call evidence it should not read as partial progress.
                tool_calls: Some(0),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subtask::Subtask;
    use crate::services::health_tracker::FailureKind;

    #[test]
    fn selects_worker_with_matching_capability() {
        let task = Subtask::new("x", TaskType::Research, 1);
        let workers = vec![
            Worker::new("w1", "haiku", &["implement"]),
            Worker::new("w2", "sonnet", &["research"]),
        ];
        let health = HealthTracker::new();
        let selected = select_worker(&task, &workers, &health, 0).unwrap();
        assert_eq!(selected.name, "w2");
    }

    #[test]
    fn no_capability_match_returns_none() {
        let task = Subtask::new("x", TaskType::Deploy, 1);
        let workers = vec![Worker::new("w1", "haiku", &["implement"])];
        let health = HealthTracker::new();
        assert!(select_worker(&task, &workers, &health, 0).is_none());
    }

    #[test]
    fn unhealthy_worker_ranks_behind_healthy_one() {
        let task = Subtask::new("x", TaskType::Research, 1);
        let workers = vec![
            Worker::new("unhealthy", "haiku", &["research"]),
            Worker::new("healthy", "sonnet", &["research"]),
        ];
        let mut health = HealthTracker::new();
        health.mark_unhealthy("haiku");
        let selected = select_worker(&task, &workers, &health, 0).unwrap();
        assert_eq!(selected.name, "healthy");
    }

    #[test]
    fn round_robin_within_top_tier() {
        let task = Subtask::new("x", TaskType::Research, 1);
        let workers = vec![
            Worker::new("w1", "model-a", &["research"]),
            Worker::new("w2", "model-b", &["research"]),
        ];
        let health = HealthTracker::new();
        let first = select_worker(&task, &workers, &health, 0).unwrap();
        let second = select_worker(&task, &workers, &health, 1).unwrap();
        assert_ne!(first.name, second.name);
    }

    #[test]
    fn hollow_rate_within_band_does_not_override_success_rate_tiebreak() {
        let task = Subtask::new("x", TaskType::Research, 1);
        let workers = vec![
            Worker::new("w1", "model-a", &["research"]),
            Worker::new("w2", "model-b", &["research"]),
        ];
        let mut health = HealthTracker::new();
        // model-a: slightly higher hollow rate but within the band, much better success rate.
        health.record_success("model-a", 10.0);
        health.record_success("model-a", 10.0);
        health.record_hollow("model-a");
        health.record_failure("model-b", FailureKind::Generic);
        health.record_failure("model-b", FailureKind::Generic);
        let selected = select_worker(&task, &workers, &health, 0).unwrap();
        assert_eq!(selected.model, "model-a");
    }

    #[test]
    fn to_task_result_encodes_timeout_as_no_tool_calls() {
        let spawn_result: anyhow::Result<SpawnResult> = Ok(SpawnResult {
            success: false,
            output: String::new(),
            metrics: crate::ports::spawner::SpawnMetrics { tokens: 0, duration_ms: 0, tool_calls: None, files_modified: None, closure_report: None },
        });
        let result = WorkerPool::to_task_result(&spawn_result, "haiku", Duration::from_secs(1));
        assert!(result.timed_out());
    }

    #[test]
    fn to_task_result_does_not_conflate_dispatch_error_with_timeout() {
        let spawn_result: anyhow::Result<SpawnResult> = Err(anyhow::anyhow!("connection reset"));
        let result = WorkerPool::to_task_result(&spawn_result, "haiku", Duration::from_secs(1));
        assert!(!result.timed_out());
    }
}
