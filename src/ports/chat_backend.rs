//! The chat/completion backend used to call language models.
//!
//! Deliberately out of scope for this crate: the orchestrator only depends on this trait,
//! never on a concrete HTTP client. Production wiring lives in the enclosing repository.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One message in a chat-style conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

/// Request parameters for a single chat call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Token/cost accounting returned alongside every chat response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Usage,
}

/// A synthetic tool definition used to probe a model's tool-calling capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ToolChatResponse {
    pub content: String,
    pub tool_calls: Vec<String>,
    pub usage: Usage,
}

/// The chat/completion backend external interface.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], request: &ChatRequest) -> anyhow::Result<ChatResponse>;

    /// Optional: used for capability probing. Backends that cannot support tool calls may
    /// return an error; the probe step treats that the same as "no tool call returned".
    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        request: &ChatRequest,
        tools: &[ToolSpec],
    ) -> anyhow::Result<ToolChatResponse>;
}
