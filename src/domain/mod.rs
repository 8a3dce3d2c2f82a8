//! Domain data model: subtasks, the DAG they form, budgets, health, plans and checkpoints.

pub mod budget;
pub mod checkpoint;
pub mod dag;
pub mod decomposition;
pub mod events;
pub mod health;
pub mod plan;
pub mod shared_context;
pub mod subtask;

pub use budget::BudgetPoolState;
pub use checkpoint::Checkpoint;
pub use decomposition::DecompositionResult;
pub use events::ExecutionEvent;
pub use health::HealthRecord;
pub use plan::Plan;
pub use shared_context::{SharedContext, SharedEconomics};
pub use subtask::{FailureMode, RetryContext, Subtask, SubtaskResult, SubtaskStatus, TaskType};
