//! Scenario 6 — the decomposer gets malformed JSON back on both its initial attempt and its
//! automatic retry, and the run aborts instead of proceeding with an empty plan.

mod common;

use std::sync::Arc;

use common::{ScriptedBackend, ScriptedSpawner};
use swarm_orchestrator::config::OrchestratorConfig;
use swarm_orchestrator::OrchestratorBuilder;

#[tokio::test]
async fn malformed_decomposition_aborts_after_one_retry() {
    let mut config = OrchestratorConfig::default();
    config.enable_planning = false;
    config.enable_wave_review = false;
    config.enable_verification = false;
    config.enable_persistence = false;
    config.workers = serde_yaml::from_str(
        r"
        - name: writer
          model: writer-model
          capabilities: [document]
        ",
    )
    .unwrap();

    let backend = Arc::new(ScriptedBackend::new("not valid json at all"));
    let spawner = Arc::new(ScriptedSpawner::new("unused"));

    let mut orchestrator = OrchestratorBuilder::new(config, backend.clone(), spawner).build();
    let result = orchestrator.run("a prompt the decomposer cannot parse").await;

    let err = result.expect_err("a run with an unparseable decomposition must not succeed");
    assert!(err.to_string().contains("Decomposition failed"), "unexpected error message: {err}");
    assert_eq!(backend.decompose_calls.load(std::sync::atomic::Ordering::SeqCst), 2, "decomposer should retry exactly once");
}
