//! Ordered resilience pipeline applied to a non-retriable failure before cascade-skip fires.
//!
//! Stages run in order; the first that succeeds stops the pipeline: pre-dispatch
//! auto-split (foundation tasks, first attempt only), micro-decomposition (attempt >= 2),
//! degraded acceptance (anything landed on disk), cascade-skip as the last resort.

use serde::Deserialize;
use uuid::Uuid;

use crate::domain::subtask::{Subtask, SubtaskResult, TaskType};
use crate::ports::chat_backend::{ChatBackend, ChatMessage, ChatRequest};

#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub auto_split_enabled: bool,
    pub auto_split_complexity_floor: u8,
    /// Task-type names (as returned by `required_capability`) eligible for auto-split, on
    /// top of the built-in exclusion list. Empty means no further restriction.
    pub auto_split_splittable_types: Vec<String>,
    pub auto_split_max_subtasks: u8,
    pub micro_decompose_complexity_floor: u8,
    pub degraded_quality_cap: u8,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            auto_split_enabled: true,
            auto_split_complexity_floor: 6,
            auto_split_splittable_types: Vec::new(),
            auto_split_max_subtasks: 4,
            micro_decompose_complexity_floor: 4,
            degraded_quality_cap: 2,
        }
    }
}

/// What the pipeline decided to do about a failed task.
#[derive(Debug)]
pub enum ResilienceDecision {
    Split(Vec<Subtask>),
    MicroDecompose(Vec<Subtask>),
    DegradedAccept(SubtaskResult),
    CascadeSkip,
}

/// Types too atomic or too procedural to meaningfully split into parallel pieces. If
/// `allowed` is non-empty, a type must also appear in it (by `required_capability` name) to
/// be considered splittable.
#[must_use]
pub fn is_splittable(task_type: &TaskType, allowed: &[String]) -> bool {
    let not_excluded = !matches!(task_type, TaskType::Review | TaskType::Deploy | TaskType::Merge | TaskType::Integrate);
    if !not_excluded || allowed.is_empty() {
        return not_excluded;
    }
    let name = crate::services::worker_pool::required_capability(task_type);
    allowed.iter().any(|t| t.eq_ignore_ascii_case(&name))
}

#[derive(Debug, Deserialize)]
struct RawSplitResponse {
    #[serde(default)]
    should_split: bool,
    #[serde(default)]
    subtasks: Vec<RawSplitSubtask>,
}

#[derive(Debug, Deserialize)]
struct RawSplitSubtask {
    description: String,
    #[serde(default)]
    complexity: Option<u8>,
    #[serde(default)]
    depends_on: Vec<usize>,
}

fn resolve_split_subtasks(raw: Vec<RawSplitSubtask>, task: &Subtask, complexity_cap: Option<u8>) -> Vec<Subtask> {
    let ids: Vec<Uuid> = raw.iter().map(|_| Uuid::new_v4()).collect();
    raw.iter()
        .enumerate()
        .map(|(i, spec)| {
            let complexity = spec.complexity.unwrap_or(task.complexity);
            let complexity = complexity_cap.map_or(complexity, |cap| complexity.min(cap));
            let depends_on: Vec<Uuid> = spec.depends_on.iter().filter(|&&d| d != i).filter_map(|&d| ids.get(d).copied()).collect();
            let mut subtask = Subtask::new(spec.description.clone(), task.task_type.clone(), complexity);
            subtask.id = ids[i];
            subtask.depends_on = depends_on;
            subtask.target_files = task.target_files.clone();
            subtask.read_only_files = task.read_only_files.clone();
            subtask
        })
        .collect()
}

/// Stage 1: pre-dispatch auto-split, only for a foundation task's first attempt, above the
/// configured complexity floor, and of a splittable type.
pub async fn try_auto_split(
    backend: &dyn ChatBackend,
    model: &str,
    task: &Subtask,
    config: &ResilienceConfig,
) -> anyhow::Result<Option<Vec<Subtask>>> {
    if !config.auto_split_enabled
        || !task.foundation
        || task.attempts > 1
        || task.complexity < config.auto_split_complexity_floor
        || !is_splittable(&task.task_type, &config.auto_split_splittable_types)
    {
        return Ok(None);
    }

    let prompt = format!(
        "Task: {}\n\nShould this be split into 2-4 parallel subtasks that can proceed independently? \
         Reply with JSON: {{\"should_split\": bool, \"subtasks\": [{{\"description\": ..., \"complexity\": 1-10, \"depends_on\": [indices]}}]}}",
        task.description
    );
    let response = backend
        .chat(
            &[ChatMessage::system("You are a task-splitting assistant."), ChatMessage::user(prompt)],
            &ChatRequest { model: model.to_string(), max_tokens: 1024, temperature: 0.2 },
        )
        .await?;

    let mut parsed: RawSplitResponse = serde_json::from_str(response.content.trim())?;
    if !parsed.should_split || parsed.subtasks.is_empty() {
        return Ok(None);
    }
    parsed.subtasks.truncate(config.auto_split_max_subtasks.max(1) as usize);
    Ok(Some(resolve_split_subtasks(parsed.subtasks, task, None)))
}

/// Stage 2: micro-decomposition once a task has failed at least twice, each resulting
/// subtask capped to half the original complexity (rounded up).
pub async fn try_micro_decompose(
    backend: &dyn ChatBackend,
    model: &str,
    task: &Subtask,
    config: &ResilienceConfig,
) -> anyhow::Result<Option<Vec<Subtask>>> {
    if task.attempts < 2 || task.complexity < config.micro_decompose_complexity_floor {
        return Ok(None);
    }

    let feedback = task.retry_context.as_ref().and_then(|rc| rc.feedback.clone()).unwrap_or_default();
    let prompt = format!(
        "This task has failed {} times: {}\n\nFeedback from the last attempt: {feedback}\n\n\
         Break it into 2-3 smaller subtasks that are each easier to complete correctly. \
         Reply with JSON: {{\"subtasks\": [{{\"description\": ..., \"depends_on\": [indices]}}]}}",
        task.attempts, task.description
    );
    let response = backend
        .chat(
            &[ChatMessage::system("You are a task-decomposition assistant."), ChatMessage::user(prompt)],
            &ChatRequest { model: model.to_string(), max_tokens: 1024, temperature: 0.3 },
        )
        .await?;

    let parsed: RawSplitResponse = serde_json::from_str(response.content.trim())?;
    if parsed.subtasks.is_empty() {
        return Ok(None);
    }
    let cap = task.complexity.div_ceil(2);
    Ok(Some(resolve_split_subtasks(parsed.subtasks, task, Some(cap))))
}

/// Stage 3: degraded acceptance if anything landed on disk, or the worker at least made
/// tool calls (including the timeout sentinel, which still implies partial progress).
#[must_use]
pub fn try_degraded_acceptance(task: &Subtask, last_result: &SubtaskResult, config: &ResilienceConfig) -> Option<SubtaskResult> {
    let artifacts_exist = !task.target_files.is_empty()
        && task.target_files.iter().any(|f| std::path::Path::new(f).exists());
    let had_tool_calls = last_result.tool_calls.is_some_and(|n| n > 0) || last_result.timed_out();

    if !artifacts_exist && !had_tool_calls {
        return None;
    }

    let mut degraded = last_result.clone();
    degraded.success = true;
    degraded.degraded = true;
    degraded.quality_score = Some(degraded.quality_score.unwrap_or(config.degraded_quality_cap).min(config.degraded_quality_cap));
    Some(degraded)
}

/// Runs the full pipeline in order, short-circuiting on the first stage that applies.
pub async fn resolve(
    backend: &dyn ChatBackend,
    model: &str,
    task: &Subtask,
    last_result: Option<&SubtaskResult>,
    config: &ResilienceConfig,
) -> ResilienceDecision {
    match try_auto_split(backend, model, task, config).await {
        Ok(Some(subtasks)) => return ResilienceDecision::Split(subtasks),
        Ok(None) => {}
        Err(err) => tracing::warn!(%err, task_id = %task.id, "auto-split probe failed"),
    }

    match try_micro_decompose(backend, model, task, config).await {
        Ok(Some(subtasks)) => return ResilienceDecision::MicroDecompose(subtasks),
        Ok(None) => {}
        Err(err) => tracing::warn!(%err, task_id = %task.id, "micro-decomposition probe failed"),
    }

    if let Some(result) = last_result {
        if let Some(degraded) = try_degraded_acceptance(task, result, config) {
            return ResilienceDecision::DegradedAccept(degraded);
        }
    }

    ResilienceDecision::CascadeSkip
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(tool_calls: Option<i64>) -> SubtaskResult {
        SubtaskResult {
            success: false,
            output: "partial".into(),
            files_modified: vec![],
            tokens_used: 5,
            cost_used: 0.0,
            duration_ms: 1,
            model: "haiku".into(),
            quality_score: None,
            feedback: None,
            degraded: false,
            closure_report: None,
            tool_calls,
        }
    }

    #[test]
    fn review_and_deploy_tasks_are_not_splittable() {
        assert!(!is_splittable(&TaskType::Review, &[]));
        assert!(!is_splittable(&TaskType::Deploy, &[]));
        assert!(is_splittable(&TaskType::Implement, &[]));
    }

    #[test]
    fn splittable_types_allowlist_further_restricts_eligible_types() {
        let allowed = vec!["implement".to_string()];
        assert!(is_splittable(&TaskType::Implement, &allowed));
        assert!(!is_splittable(&TaskType::Research, &allowed));
        // the built-in exclusion list still applies even if a caller lists it.
        assert!(!is_splittable(&TaskType::Deploy, &vec!["deploy".to_string()]));
    }

    #[test]
    fn disabling_auto_split_short_circuits_without_a_backend_call() {
        let task = {
            let mut t = Subtask::new("x", TaskType::Implement, 8);
            t.foundation = true;
            t
        };
        let config = ResilienceConfig { auto_split_enabled: false, ..ResilienceConfig::default() };
        struct PanicBackend;
        #[async_trait::async_trait]
        impl ChatBackend for PanicBackend {
            async fn chat(&self, _messages: &[ChatMessage], _request: &ChatRequest) -> anyhow::Result<crate::ports::chat_backend::ChatResponse> {
                panic!("auto-split disabled should never call the backend");
            }
            async fn chat_with_tools(
                &self,
                _messages: &[ChatMessage],
                _request: &ChatRequest,
                _tools: &[crate::ports::chat_backend::ToolSpec],
            ) -> anyhow::Result<crate::ports::chat_backend::ToolChatResponse> {
                panic!("auto-split disabled should never call the backend");
            }
        }
        let result = tokio_test::block_on(try_auto_split(&PanicBackend, "orchestrator", &task, &config)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn degraded_acceptance_rejected_with_no_artifacts_and_no_tool_calls() {
        let task = Subtask::new("x", TaskType::Implement, 5);
        let config = ResilienceConfig::default();
        assert!(try_degraded_acceptance(&task, &result(Some(0)), &config).is_none());
    }

    #[test]
    fn degraded_acceptance_accepted_on_timeout_sentinel() {
        let task = Subtask::new("x", TaskType::Implement, 5);
        let config = ResilienceConfig::default();
        let degraded = try_degraded_acceptance(&task, &result(None), &config).unwrap();
        assert!(degraded.degraded);
        assert!(degraded.success);
        assert_eq!(degraded.quality_score, Some(config.degraded_quality_cap));
    }

    #[test]
    fn degraded_acceptance_caps_quality_score_even_if_already_set() {
        let task = Subtask::new("x", TaskType::Implement, 5);
        let config = ResilienceConfig::default();
        let mut r = result(Some(3));
        r.quality_score = Some(4);
        let degraded = try_degraded_acceptance(&task, &r, &config).unwrap();
        assert_eq!(degraded.quality_score, Some(2));
    }

    #[test]
    fn resolve_split_subtasks_drops_self_referencing_dependency() {
        let task = Subtask::new("x", TaskType::Implement, 8);
        let raw = vec![RawSplitSubtask { description: "a".into(), complexity: None, depends_on: vec![0] }];
        let resolved = resolve_split_subtasks(raw, &task, None);
        assert!(resolved[0].depends_on.is_empty());
    }

    #[test]
    fn resolve_split_subtasks_applies_complexity_cap() {
        let task = Subtask::new("x", TaskType::Implement, 8);
        let raw = vec![RawSplitSubtask { description: "a".into(), complexity: Some(9), depends_on: vec![] }];
        let resolved = resolve_split_subtasks(raw, &task, Some(4));
        assert_eq!(resolved[0].complexity, 4);
    }
}
