//! Shared mock collaborators for scenario tests: a scripted chat backend and a scripted
//! worker spawner, so these tests exercise the orchestrator end to end with no network
//! call.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use swarm_orchestrator::ports::{
    ChatBackend, ChatMessage, ChatRequest, ChatResponse, RetryHints, SpawnMetrics, SpawnResult, ToolChatResponse,
    ToolSpec, Usage, WorkerSpawner,
};

/// One scripted judge rule: if the prompt's task description contains `marker`, reply with
/// `score`/`feedback` instead of the backend's default.
pub struct JudgeOverride {
    pub marker: &'static str,
    pub score: u8,
    pub feedback: &'static str,
}

/// A `ChatBackend` that answers deterministically based on which structural prompt it
/// receives (decomposition, judge, planning, review, re-plan), so scenario tests don't
/// depend on a real model.
pub struct ScriptedBackend {
    pub decomposition_json: String,
    pub default_judge_score: u8,
    pub judge_overrides: Vec<JudgeOverride>,
    pub decompose_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(decomposition_json: impl Into<String>) -> Self {
        Self {
            decomposition_json: decomposition_json.into(),
            default_judge_score: 4,
            judge_overrides: Vec::new(),
            decompose_calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_judge_override(mut self, marker: &'static str, score: u8, feedback: &'static str) -> Self {
        self.judge_overrides.push(JudgeOverride { marker, score, feedback });
        self
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn chat(&self, messages: &[ChatMessage], _request: &ChatRequest) -> anyhow::Result<ChatResponse> {
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or_default();
        let user = messages.get(1).map(|m| m.content.as_str()).unwrap_or_default();

        if system.contains("task decomposition engine") {
            self.decompose_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(ChatResponse { content: self.decomposition_json.clone(), usage: Usage::default() });
        }

        if system.contains("strict code reviewer") {
            for rule in &self.judge_overrides {
                if user.contains(rule.marker) {
                    let content = format!(r#"{{"score": {}, "feedback": "{}"}}"#, rule.score, rule.feedback);
                    return Ok(ChatResponse { content, usage: Usage::default() });
                }
            }
            let content = format!(r#"{{"score": {}, "feedback": "looks good"}}"#, self.default_judge_score);
            return Ok(ChatResponse { content, usage: Usage::default() });
        }

        if system.contains("QA reviewer") {
            return Ok(ChatResponse { content: r#"{"fixups": []}"#.into(), usage: Usage::default() });
        }

        Ok(ChatResponse { content: "{}".into(), usage: Usage::default() })
    }

    async fn chat_with_tools(
        &self,
        _messages: &[ChatMessage],
        _request: &ChatRequest,
        _tools: &[ToolSpec],
    ) -> anyhow::Result<ToolChatResponse> {
        Ok(ToolChatResponse { content: String::new(), tool_calls: vec!["ping".to_string()], usage: Usage::default() })
    }
}

/// A `WorkerSpawner` whose answer for a given prompt is looked up by substring match
/// against the task description baked into the prompt, falling back to a default success.
pub struct ScriptedSpawner {
    rules: Mutex<Vec<(&'static str, SpawnBehavior)>>,
    default_output: String,
}

pub enum SpawnBehavior {
    Succeed { output: String, tool_calls: i64 },
    Fail(&'static str),
}

impl ScriptedSpawner {
    pub fn new(default_output: impl Into<String>) -> Self {
        Self { rules: Mutex::new(Vec::new()), default_output: default_output.into() }
    }

    #[must_use]
    pub fn with_rule(self, marker: &'static str, behavior: SpawnBehavior) -> Self {
        self.rules.lock().unwrap().push((marker, behavior));
        self
    }
}

#[async_trait]
impl WorkerSpawner for ScriptedSpawner {
    async fn spawn(&self, _worker_name: &str, prompt: &str, _retry_hints: Option<&RetryHints>) -> anyhow::Result<SpawnResult> {
        let rules = self.rules.lock().unwrap();
        for (marker, behavior) in rules.iter() {
            if prompt.contains(marker) {
                return match behavior {
                    SpawnBehavior::Succeed { output, tool_calls } => Ok(SpawnResult {
                        success: true,
                        output: output.clone(),
                        metrics: SpawnMetrics {
                            tokens: 400,
                            duration_ms: 20,
                            tool_calls: Some(*tool_calls),
                            files_modified: Some(Vec::new()),
                            closure_report: None,
                        },
                    }),
                    SpawnBehavior::Fail(message) => anyhow::bail!(message.to_string()),
                };
            }
        }
        Ok(SpawnResult {
            success: true,
            output: self.default_output.clone(),
            metrics: SpawnMetrics { tokens: 400, duration_ms: 20, tool_calls: Some(1), files_modified: Some(Vec::new()), closure_report: None },
        })
    }
}
