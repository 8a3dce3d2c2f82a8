//! External interfaces the orchestrator depends on but does not implement.

pub mod blackboard;
pub mod chat_backend;
pub mod checkpoint_store;
pub mod spawner;

pub use blackboard::{Blackboard, Finding, FindingType, NullBlackboard};
pub use chat_backend::{ChatBackend, ChatMessage, ChatRequest, ChatResponse, ToolChatResponse, ToolSpec, Usage};
pub use checkpoint_store::CheckpointStore;
pub use spawner::{RetryHints, SpawnMetrics, SpawnResult, WorkerSpawner};
