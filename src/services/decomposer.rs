//! Calls an LLM to break a prompt into a DAG of subtasks, and validates the result.

use serde::Deserialize;
use uuid::Uuid;

use crate::domain::decomposition::{DecompositionMetadata, DecompositionResult, DecompositionStrategy};
use crate::domain::subtask::{Subtask, TaskType};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::ports::chat_backend::{ChatBackend, ChatMessage, ChatRequest};

/// Wire format returned by the LLM: dependencies are indices into the same array, not
/// ids, since the LLM cannot know ids ahead of time.
#[derive(Debug, Clone, Deserialize)]
struct RawSubtaskSpec {
    description: String,
    #[serde(default = "default_task_type")]
    task_type: String,
    #[serde(default = "default_complexity")]
    complexity: u8,
    #[serde(default)]
    depends_on: Vec<usize>,
    #[serde(default)]
    target_files: Vec<String>,
    #[serde(default)]
    read_only_files: Vec<String>,
}

fn default_task_type() -> String {
    "implement".into()
}

fn default_complexity() -> u8 {
    5
}

#[derive(Debug, Deserialize)]
struct RawDecomposition {
    subtasks: Vec<RawSubtaskSpec>,
    #[serde(default)]
    strategy: Option<String>,
    #[serde(default)]
    reasoning: String,
}

fn parse_task_type(raw: &str) -> TaskType {
    match raw.to_ascii_lowercase().as_str() {
        "research" => TaskType::Research,
        "analysis" => TaskType::Analysis,
        "design" => TaskType::Design,
        "implement" => TaskType::Implement,
        "test" => TaskType::Test,
        "refactor" => TaskType::Refactor,
        "review" => TaskType::Review,
        "document" => TaskType::Document,
        "integrate" => TaskType::Integrate,
        "deploy" => TaskType::Deploy,
        "merge" => TaskType::Merge,
        other => TaskType::Custom(other.to_string()),
    }
}

fn parse_strategy(raw: Option<&str>) -> DecompositionStrategy {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("sequential") => DecompositionStrategy::Sequential,
        Some("parallel") => DecompositionStrategy::Parallel,
        Some("hierarchical") => DecompositionStrategy::Hierarchical,
        Some("pipeline") => DecompositionStrategy::Pipeline,
        _ => DecompositionStrategy::Adaptive,
    }
}

fn raw_to_result(raw: RawDecomposition, llm_assisted: bool) -> OrchestratorResult<DecompositionResult> {
    let ids: Vec<Uuid> = raw.subtasks.iter().map(|_| Uuid::new_v4()).collect();
    let mut subtasks = Vec::with_capacity(raw.subtasks.len());

    for (i, spec) in raw.subtasks.iter().enumerate() {
        let mut depends_on = Vec::with_capacity(spec.depends_on.len());
        for &dep_index in &spec.depends_on {
            if dep_index == i {
                return Err(OrchestratorError::DecompositionParseError(format!("self-loop at index {i}")));
            }
            let dep_id = ids.get(dep_index).ok_or_else(|| {
                OrchestratorError::DecompositionParseError(format!("dependency index {dep_index} out of range"))
            })?;
            depends_on.push(*dep_id);
        }

        let mut task = Subtask::new(spec.description.clone(), parse_task_type(&spec.task_type), spec.complexity);
        task.id = ids[i];
        task.depends_on = depends_on;
        task.target_files = spec.target_files.clone();
        task.read_only_files = spec.read_only_files.clone();
        subtasks.push(task);
    }

    Ok(DecompositionResult {
        subtasks,
        strategy: parse_strategy(raw.strategy.as_deref()),
        reasoning: raw.reasoning,
        metadata: DecompositionMetadata { llm_assisted, parse_errors: vec![] },
    })
}

/// Validates structural invariants: acyclic, no self-loops (checked during parse),
/// at least 2 subtasks, and at least one LLM-assisted subtask.
fn validate(result: &DecompositionResult) -> OrchestratorResult<()> {
    if result.subtasks.len() < 2 {
        return Err(OrchestratorError::InsufficientSubtasks(format!(
            "decomposition produced {} subtask(s), need at least 2",
            result.subtasks.len()
        )));
    }
    if !result.metadata.llm_assisted {
        return Err(OrchestratorError::DecompositionParseError(
            "heuristic fallback DAG rejected as strictly worse than aborting".into(),
        ));
    }
    if crate::domain::dag::has_cycle(&result.subtasks) {
        let offending = result.subtasks.first().map(|t| t.id).unwrap_or_default();
        return Err(OrchestratorError::DependencyCycle(offending));
    }
    Ok(())
}

const RAW_JSON_ONLY_INSTRUCTION: &str =
    "Your previous reply could not be parsed. Reply with raw JSON only: no prose, no markdown fences.";

/// Decomposes `prompt` into a validated DAG, issuing one automatic retry with an explicit
/// raw-JSON instruction if the first attempt returns zero subtasks or fails to parse.
pub async fn decompose(
    backend: &dyn ChatBackend,
    model: &str,
    prompt: &str,
) -> OrchestratorResult<DecompositionResult> {
    let system = ChatMessage::system(
        "You are a task decomposition engine. Break the user's request into a DAG of subtasks. \
         Reply with JSON: {\"subtasks\": [{\"description\": ..., \"task_type\": ..., \"complexity\": 1-10, \
         \"depends_on\": [indices into this array], \"target_files\": [...], \"read_only_files\": [...]}], \
         \"strategy\": \"sequential|parallel|hierarchical|adaptive|pipeline\", \"reasoning\": \"...\"}",
    );

    for attempt in 0..2 {
        let user_message = if attempt == 0 {
            ChatMessage::user(prompt)
        } else {
            ChatMessage::user(format!("{prompt}\n\n{RAW_JSON_ONLY_INSTRUCTION}"))
        };

        let request = ChatRequest { model: model.to_string(), max_tokens: 4096, temperature: 0.2 };
        let response = backend.chat(&[system.clone(), user_message], &request).await;

        let response = match response {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(%err, attempt, "decomposer chat call failed");
                continue;
            }
        };

        let raw: Result<RawDecomposition, _> = serde_json::from_str(response.content.trim());
        match raw {
            Ok(raw) if !raw.subtasks.is_empty() => {
                let result = raw_to_result(raw, true)?;
                validate(&result)?;
                return Ok(result);
            }
            Ok(_) => tracing::warn!(attempt, "decomposition returned zero subtasks"),
            Err(err) => tracing::warn!(%err, attempt, "failed to parse decomposition JSON"),
        }
    }

    Err(OrchestratorError::DecompositionParseError("Decomposition failed after retry".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> RawDecomposition {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_basic_dag_and_resolves_indices_to_ids() {
        let raw = raw(
            r#"{"subtasks": [
                {"description": "a", "task_type": "research", "complexity": 2, "depends_on": []},
                {"description": "b", "task_type": "implement", "complexity": 5, "depends_on": [0]}
            ]}"#,
        );
        let result = raw_to_result(raw, true).unwrap();
        assert_eq!(result.subtasks.len(), 2);
        assert_eq!(result.subtasks[1].depends_on, vec![result.subtasks[0].id]);
    }

    #[test]
    fn self_loop_is_rejected() {
        let raw = raw(r#"{"subtasks": [{"description": "a", "depends_on": [0]}]}"#);
        let err = raw_to_result(raw, true).unwrap_err();
        assert!(matches!(err, OrchestratorError::DecompositionParseError(_)));
    }

    #[test]
    fn out_of_range_dependency_is_rejected() {
        let raw = raw(r#"{"subtasks": [{"description": "a", "depends_on": [5]}]}"#);
        let err = raw_to_result(raw, true).unwrap_err();
        assert!(matches!(err, OrchestratorError::DecompositionParseError(_)));
    }

    #[test]
    fn validate_rejects_fewer_than_two_subtasks() {
        let raw = raw(r#"{"subtasks": [{"description": "only one"}]}"#);
        let result = raw_to_result(raw, true).unwrap();
        let err = validate(&result).unwrap_err();
        assert!(matches!(err, OrchestratorError::InsufficientSubtasks(_)));
    }

    #[test]
    fn validate_rejects_heuristic_fallback() {
        let raw = raw(r#"{"subtasks": [{"description": "a"}, {"description": "b"}]}"#);
        let result = raw_to_result(raw, false).unwrap();
        let err = validate(&result).unwrap_err();
        assert!(matches!(err, OrchestratorError::DecompositionParseError(_)));
    }

    #[test]
    fn flat_dag_is_flagged_at_three_or_more_independent_subtasks() {
        let raw = raw(
            r#"{"subtasks": [{"description": "a"}, {"description": "b"}, {"description": "c"}]}"#,
        );
        let result = raw_to_result(raw, true).unwrap();
        assert!(result.flat());
    }
}
