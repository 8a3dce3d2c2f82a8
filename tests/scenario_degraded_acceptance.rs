//! Scenario 3 — a foundation task that keeps failing quality review is rescued by degraded
//! acceptance once its claimed artifact exists on disk, and its dependents proceed rather
//! than cascade-skipping.

mod common;

use std::sync::Arc;

use common::{ScriptedBackend, ScriptedSpawner, SpawnBehavior};
use swarm_orchestrator::config::OrchestratorConfig;
use swarm_orchestrator::OrchestratorBuilder;

#[tokio::test]
async fn foundation_task_rescued_by_degraded_acceptance() {
    let artifact = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(artifact.path(), b"some generated content").unwrap();
    let artifact_path = artifact.path().to_string_lossy().to_string();

    let decomposition = format!(
        r#"{{
            "subtasks": [
                {{"description": "produce the shared root artifact", "task_type": "document", "complexity": 3, "depends_on": [], "target_files": ["{path}"]}},
                {{"description": "consume root for report A", "task_type": "document", "complexity": 2, "depends_on": [0]}},
                {{"description": "consume root for report B", "task_type": "document", "complexity": 2, "depends_on": [0]}},
                {{"description": "consume root for report C", "task_type": "document", "complexity": 2, "depends_on": [0]}}
            ],
            "strategy": "hierarchical",
            "reasoning": "one shared root, three dependents"
        }}"#,
        path = artifact_path.replace('\\', "\\\\")
    );

    let mut config = OrchestratorConfig::default();
    config.enable_planning = false;
    config.enable_wave_review = false;
    config.enable_verification = false;
    config.enable_persistence = false;
    config.worker_retries = 1;
    config.workers = serde_yaml::from_str(
        r"
        - name: writer
          model: writer-model
          capabilities: [document]
        ",
    )
    .unwrap();

    let backend = Arc::new(
        ScriptedBackend::new(decomposition)
            .with_judge_override("produce the shared root artifact", 1, "not good enough"),
    );
    let spawner = Arc::new(ScriptedSpawner::new(
        "a sufficiently long default worker output string for the preflight gate to accept",
    ));

    let mut orchestrator = OrchestratorBuilder::new(config, backend, spawner).build();
    let summary = orchestrator.run("produce a root document and three reports").await.unwrap();

    assert_eq!(summary.total_tasks, 4);
    assert_eq!(summary.completed, 4, "root task should be rescued as degraded, not left failed or cascade-skipped");
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 0);
}

#[tokio::test]
async fn dispatch_error_with_no_artifact_falls_through_to_cascade_skip() {
    let decomposition = r#"{
        "subtasks": [
            {"description": "root task with no artifact", "task_type": "document", "complexity": 3, "depends_on": []},
            {"description": "dependent report", "task_type": "document", "complexity": 2, "depends_on": [0]}
        ],
        "strategy": "hierarchical",
        "reasoning": "one root, one dependent"
    }"#;

    let mut config = OrchestratorConfig::default();
    config.enable_planning = false;
    config.enable_wave_review = false;
    config.enable_verification = false;
    config.enable_persistence = false;
    config.worker_retries = 1;
    config.workers = serde_yaml::from_str(
        r"
        - name: writer
          model: writer-model
          capabilities: [document]
        ",
    )
    .unwrap();

    let backend = Arc::new(ScriptedBackend::new(decomposition));
    let spawner = Arc::new(
        ScriptedSpawner::new("a sufficiently long default worker output string for the preflight gate")
            .with_rule("root task with no artifact", SpawnBehavior::Fail("worker crashed")),
    );

    let mut orchestrator = OrchestratorBuilder::new(config, backend, spawner).build();
    let summary = orchestrator.run("produce a root and a dependent").await.unwrap();

    assert_eq!(summary.total_tasks, 2);
    assert_eq!(summary.skipped + summary.failed, 1, "the dependent should end up skipped or failed, not silently completed");
}
