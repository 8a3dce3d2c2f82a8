//! Concurrent, budget-bounded DAG executor for heterogeneous LLM worker swarms.
//!
//! A caller decomposes a natural-language task into a graph of subtasks, schedules them
//! into waves of maximum parallelism, dispatches each to a pool of model backends, and
//! drives the graph to completion under token, cost, time, and quality constraints with
//! failure recovery built in. The chat/completion backend and the low-level worker spawner
//! are supplied by the embedding application through the [`ports`] traits; this crate owns
//! everything else: the DAG scheduler, the budget pool, per-model health tracking, the
//! quality gate, and the resilience pipeline.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod ports;
pub mod services;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, RunSummary};
