//! Four composable validators: pre-flight, concrete checks, LLM judge, and a per-model
//! judge circuit breaker.

use std::collections::HashMap;
use std::path::Path;

use crate::domain::plan::Plan;
use crate::domain::subtask::{Subtask, SubtaskResult, TaskType};
use crate::ports::chat_backend::{ChatBackend, ChatMessage, ChatRequest};

const LLM_REJECTION_DISABLE_THRESHOLD: u32 = 5;
const MIN_OUTPUT_LEN_BY_TYPE_DEFAULT: usize = 20;

/// Outcome of any single validator.
#[derive(Debug, Clone)]
pub struct GateVerdict {
    pub passed: bool,
    pub score: u8,
    pub feedback: String,
}

/// Cached report of which claimed files actually exist, to avoid re-scanning the
/// filesystem for every validator within one evaluation.
#[derive(Debug, Clone, Default)]
pub struct ArtifactReport {
    pub existing: Vec<String>,
    pub missing: Vec<String>,
}

impl ArtifactReport {
    #[must_use]
    pub fn build(files: &[String]) -> Self {
        let mut report = Self::default();
        for file in files {
            let path = Path::new(file);
            if path.exists() && path.metadata().map(|m| m.len() > 0).unwrap_or(false) {
                report.existing.push(file.clone());
            } else {
                report.missing.push(file.clone());
            }
        }
        report
    }

    #[must_use]
    pub fn all_exist(&self) -> bool {
        self.missing.is_empty()
    }
}

fn min_output_len(task_type: &TaskType) -> usize {
    match task_type {
        TaskType::Document | TaskType::Research => 80,
        _ => MIN_OUTPUT_LEN_BY_TYPE_DEFAULT,
    }
}

/// Cheap, deterministic check with no LLM call: output length, claimed-file existence.
#[must_use]
pub fn pre_flight(task: &Subtask, result: &SubtaskResult, artifacts: &ArtifactReport) -> GateVerdict {
    if result.output.trim().len() < min_output_len(&task.task_type) {
        return GateVerdict { passed: false, score: 1, feedback: "output too short".into() };
    }
    if !task.target_files.is_empty() && !artifacts.all_exist() {
        return GateVerdict {
            passed: false,
            score: 1,
            feedback: format!("missing claimed files: {:?}", artifacts.missing),
        };
    }
    GateVerdict { passed: true, score: 3, feedback: "pre-flight passed".into() }
}

/// Per-type cheap structural checks: expected extensions for the task's target files.
#[must_use]
pub fn concrete_checks(task: &Subtask, result: &SubtaskResult) -> GateVerdict {
    let expects_code = matches!(task.task_type, TaskType::Implement | TaskType::Refactor | TaskType::Test);
    if expects_code {
        let has_code_file = result.files_modified.iter().any(|f| {
            Path::new(f).extension().is_some_and(|ext| !ext.is_empty())
        });
        if !has_code_file {
            return GateVerdict { passed: false, score: 1, feedback: "no recognizable code file among modifications".into() };
        }
    }
    GateVerdict { passed: true, score: 3, feedback: "concrete checks passed".into() }
}

/// Parsed reply from the LLM judge.
#[derive(Debug, Clone, serde::Deserialize)]
struct JudgeReply {
    score: u8,
    feedback: String,
}

fn file_preview(path: &str, max_bytes: usize) -> String {
    std::fs::read_to_string(path)
        .map(|content| content.chars().take(max_bytes).collect())
        .unwrap_or_default()
}

/// Per-model consecutive-rejection counter that disables the LLM judge for a model after
/// `LLM_REJECTION_DISABLE_THRESHOLD` consecutive rejections, reset at each wave boundary.
#[derive(Debug, Default)]
pub struct JudgeCircuitBreaker {
    consecutive_rejections: HashMap<String, u32>,
}

impl JudgeCircuitBreaker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rejection(&mut self, model: &str) {
        *self.consecutive_rejections.entry(model.to_string()).or_insert(0) += 1;
    }

    pub fn record_acceptance(&mut self, model: &str) {
        self.consecutive_rejections.insert(model.to_string(), 0);
    }

    #[must_use]
    pub fn judge_disabled(&self, model: &str) -> bool {
        self.consecutive_rejections.get(model).copied().unwrap_or(0) >= LLM_REJECTION_DISABLE_THRESHOLD
    }

    pub fn reset_at_wave_boundary(&mut self) {
        self.consecutive_rejections.clear();
    }
}

/// The LLM judge: asks a judge model to score the worker's output against acceptance
/// criteria and up to 10 read-back file previews capped at 2000 bytes each.
pub async fn llm_judge(
    backend: &dyn ChatBackend,
    judge_model: &str,
    task: &Subtask,
    result: &SubtaskResult,
    plan: Option<&Plan>,
) -> anyhow::Result<GateVerdict> {
    let criteria = plan.and_then(|p| p.criteria_for(task.id)).map(|c| c.join("\n- ")).unwrap_or_default();
    let previews: Vec<String> = result
        .files_modified
        .iter()
        .take(10)
        .map(|f| format!("--- {f} ---\n{}", file_preview(f, 2000)))
        .collect();

    let prompt = format!(
        "Task: {}\n\nWorker output:\n{}\n\nAcceptance criteria:\n- {criteria}\n\nFile previews:\n{}\n\nReply with JSON: {{\"score\": 1-5, \"feedback\": \"...\"}}",
        task.description,
        result.output,
        previews.join("\n\n"),
    );

    let response = backend
        .chat(
            &[ChatMessage::system("You are a strict code reviewer."), ChatMessage::user(prompt)],
            &ChatRequest { model: judge_model.to_string(), max_tokens: 512, temperature: 0.0 },
        )
        .await?;

    let reply: JudgeReply = serde_json::from_str(response.content.trim())?;
    Ok(GateVerdict { passed: reply.score >= 3, score: reply.score.clamp(1, 5), feedback: reply.feedback })
}

/// Evaluates a completed result end to end: pre-flight, concrete checks, then (if enabled
/// and not circuit-broken) the LLM judge. Falls back to concrete-checks-only acceptance
/// if the judge itself errors.
pub async fn evaluate(
    backend: &dyn ChatBackend,
    judge_model: &str,
    task: &Subtask,
    result: &SubtaskResult,
    plan: Option<&Plan>,
    breaker: &JudgeCircuitBreaker,
    enable_concrete_validation: bool,
) -> GateVerdict {
    let artifacts = ArtifactReport::build(&task.target_files);
    let preflight = pre_flight(task, result, &artifacts);
    if !preflight.passed {
        return preflight;
    }

    if enable_concrete_validation {
        let concrete = concrete_checks(task, result);
        if !concrete.passed {
            return concrete;
        }
    }

    let model = result.model.clone();
    if breaker.judge_disabled(&model) {
        return GateVerdict { passed: true, score: 3, feedback: "judge disabled by circuit breaker; pre-flight + concrete passed".into() };
    }

    match llm_judge(backend, judge_model, task, result, plan).await {
        Ok(verdict) => verdict,
        Err(err) => {
            tracing::warn!(%err, "llm judge errored, falling back to concrete-checks-only acceptance");
            let concrete = concrete_checks(task, result);
            if concrete.passed {
                GateVerdict { passed: true, score: 3, feedback: format!("judge error, accepted on concrete checks: {err}") }
            } else {
                GateVerdict { passed: false, score: concrete.score, feedback: format!("judge error, and concrete checks failed: {}", concrete.feedback) }
            }
        }
    }
}
