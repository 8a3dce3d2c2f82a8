//! Minimal process entry point.
//!
//! The chat backend and worker spawner are deliberately left to the enclosing application
//! (see `ports::chat_backend` and `ports::spawner`); this binary exists so the crate is
//! runnable end to end during development, wired against a pair of local stand-ins that
//! produce a single trivial subtask and accept it outright. A real deployment replaces
//! `DevBackend`/`DevSpawner` with adapters that call an actual model API and actually run
//! work, while reusing everything under `orchestrator`, `services`, and `domain` unchanged.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use swarm_orchestrator::adapters::FileCheckpointStore;
use swarm_orchestrator::ports::{
    ChatBackend, ChatMessage, ChatRequest, ChatResponse, SpawnMetrics, SpawnResult, ToolChatResponse, ToolSpec,
    Usage, WorkerSpawner,
};
use swarm_orchestrator::{config, logging, OrchestratorBuilder};

/// Stands in for a real model API: always returns a single-subtask decomposition so the
/// wave loop has something to run, and accepts whatever a worker produces.
struct DevBackend;

#[async_trait]
impl ChatBackend for DevBackend {
    async fn chat(&self, _messages: &[ChatMessage], _request: &ChatRequest) -> Result<ChatResponse> {
        let content = r#"{"subtasks":[{"description":"research the prompt","task_type":"research","complexity":2,"depends_on":[]},{"description":"summarize findings","task_type":"document","complexity":2,"depends_on":[0]}],"strategy":"sequential","reasoning":"two-step placeholder"}"#;
        Ok(ChatResponse { content: content.to_string(), usage: Usage::default() })
    }

    async fn chat_with_tools(
        &self,
        _messages: &[ChatMessage],
        _request: &ChatRequest,
        _tools: &[ToolSpec],
    ) -> Result<ToolChatResponse> {
        Ok(ToolChatResponse { content: String::new(), tool_calls: vec!["ping".to_string()], usage: Usage::default() })
    }
}

/// Stands in for the real worker spawner: "runs" a subtask by echoing its prompt back as
/// the output, with no files modified and no tool calls.
struct DevSpawner;

#[async_trait]
impl WorkerSpawner for DevSpawner {
    async fn spawn(
        &self,
        _worker_name: &str,
        prompt: &str,
        _retry_hints: Option<&swarm_orchestrator::ports::RetryHints>,
    ) -> Result<SpawnResult> {
        Ok(SpawnResult {
            success: true,
            output: format!("dev worker processed: {prompt}"),
            metrics: SpawnMetrics { tokens: 500, duration_ms: 50, tool_calls: Some(1), files_modified: Some(Vec::new()), closure_report: None },
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load()?;
    let _logger_guard = logging::init(&config)?;

    let prompt = std::env::var("SWARM_ORCHESTRATOR_PROMPT").unwrap_or_else(|_| "describe the repository layout".to_string());
    let state_dir = config.state_dir.clone();

    let mut orchestrator = OrchestratorBuilder::new(config, Arc::new(DevBackend), Arc::new(DevSpawner))
        .with_checkpoint_store(Arc::new(FileCheckpointStore::new(state_dir)))
        .build();

    let summary = orchestrator.run(&prompt).await?;
    tracing::info!(
        session_id = %summary.session_id,
        completed = summary.completed,
        failed = summary.failed,
        skipped = summary.skipped,
        "run finished"
    );
    println!("{}", summary.synthesized_output);

    Ok(())
}
