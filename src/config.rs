//! Layered configuration: compiled-in defaults, an optional project YAML file, then
//! environment variables, merged with `figment` the way the origin codebase's loader does.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the probe step does when every distinct model fails the tool-call probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeFailureStrategy {
    Abort,
    WarnAndTry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub name: String,
    pub model: String,
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub context_window: Option<u32>,
    #[serde(default = "default_policy_profile")]
    pub policy_profile: String,
}

fn default_policy_profile() -> String {
    "default".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTypeSpec {
    pub name: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub capability: Option<String>,
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub requires_tool_calls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoSplitConfig {
    pub enabled: bool,
    pub complexity_floor: u8,
    pub splittable_types: Vec<String>,
    pub max_subtasks: u8,
}

impl Default for AutoSplitConfig {
    fn default() -> Self {
        Self { enabled: true, complexity_floor: 6, splittable_types: vec![], max_subtasks: 4 }
    }
}

/// Every field enumerated for the orchestrator, merged from defaults, project YAML, and
/// environment variables (highest priority).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub total_budget_tokens: u64,
    pub max_cost: f64,
    pub max_concurrency: usize,
    pub worker_retries: u32,
    pub rate_limit_retries: u32,
    pub retry_base_delay_ms: u64,
    pub hollow_output_threshold: usize,
    pub hollow_termination_ratio: f64,
    pub hollow_termination_min_dispatches: usize,
    pub enable_hollow_termination: bool,
    pub max_dispatches_per_task: u32,
    pub consecutive_timeout_limit: u32,
    pub probe_timeout_ms: u64,
    pub probe_failure_strategy: ProbeFailureStrategy,
    pub enable_model_failover: bool,
    pub enable_concrete_validation: bool,
    pub enable_planning: bool,
    pub enable_wave_review: bool,
    pub enable_verification: bool,
    pub max_verification_retries: u32,
    pub enable_persistence: bool,
    pub state_dir: PathBuf,
    pub resume_session_id: Option<String>,
    pub quality_threshold: u8,
    pub quality_gates: Vec<String>,
    pub orchestrator_reserve_ratio: f64,
    pub auto_split: AutoSplitConfig,
    pub workers: Vec<WorkerSpec>,
    pub task_types: HashMap<String, TaskTypeSpec>,
    pub orchestrator_model: String,
    pub judge_model: String,
    pub log_level: String,
    pub log_format: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            total_budget_tokens: 2_000_000,
            max_cost: 50.0,
            max_concurrency: 8,
            worker_retries: 2,
            rate_limit_retries: 3,
            retry_base_delay_ms: 500,
            hollow_output_threshold: 40,
            hollow_termination_ratio: 0.55,
            hollow_termination_min_dispatches: 8,
            enable_hollow_termination: true,
            max_dispatches_per_task: 5,
            consecutive_timeout_limit: 3,
            probe_timeout_ms: 10_000,
            probe_failure_strategy: ProbeFailureStrategy::WarnAndTry,
            enable_model_failover: true,
            enable_concrete_validation: true,
            enable_planning: true,
            enable_wave_review: true,
            enable_verification: true,
            max_verification_retries: 2,
            enable_persistence: true,
            state_dir: PathBuf::from(".swarm-orchestrator/state"),
            resume_session_id: None,
            quality_threshold: 3,
            quality_gates: vec!["pre_flight".into(), "concrete_checks".into(), "llm_judge".into()],
            orchestrator_reserve_ratio: 0.1,
            auto_split: AutoSplitConfig::default(),
            workers: vec![],
            task_types: HashMap::new(),
            orchestrator_model: "claude-orchestrator".into(),
            judge_model: "claude-judge".into(),
            log_level: "info".into(),
            log_format: "pretty".into(),
            log_dir: None,
        }
    }
}

/// Validation errors, collected together rather than failing on the first one.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("total_budget_tokens and max_cost must both be positive")]
    NonPositiveBudget,

    #[error("max_concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("quality_threshold must be in [1, 5], got {0}")]
    QualityThresholdOutOfRange(u8),

    #[error("unknown probe_failure_strategy")]
    InvalidProbeFailureStrategy,

    #[error("orchestrator_reserve_ratio must be in [0.0, 0.4], got {0}")]
    ReserveRatioOutOfRange(f64),

    #[error("invalid log_level {0}, must be one of trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("invalid log_format {0}, must be json or pretty")]
    InvalidLogFormat(String),

    #[error("{} configuration error(s): {}", .0.len(), .0.iter().map(std::string::ToString::to_string).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ConfigError>),
}

fn validate(config: &OrchestratorConfig) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.total_budget_tokens == 0 || config.max_cost <= 0.0 {
        errors.push(ConfigError::NonPositiveBudget);
    }
    if config.max_concurrency == 0 {
        errors.push(ConfigError::ZeroConcurrency);
    }
    if !(1..=5).contains(&config.quality_threshold) {
        errors.push(ConfigError::QualityThresholdOutOfRange(config.quality_threshold));
    }
    if !(0.0..=0.4).contains(&config.orchestrator_reserve_ratio) {
        errors.push(ConfigError::ReserveRatioOutOfRange(config.orchestrator_reserve_ratio));
    }
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.log_level.as_str()) {
        errors.push(ConfigError::InvalidLogLevel(config.log_level.clone()));
    }
    let valid_formats = ["json", "pretty"];
    if !valid_formats.contains(&config.log_format.as_str()) {
        errors.push(ConfigError::InvalidLogFormat(config.log_format.clone()));
    }

    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.into_iter().next().unwrap()),
        _ => Err(ConfigError::Multiple(errors)),
    }
}

/// Loads configuration from compiled-in defaults, `swarm-orchestrator.yaml` if present, a
/// `swarm-orchestrator.local.yaml` override if present, then `SWARM_ORCHESTRATOR_`-prefixed
/// environment variables with `__` marking nested keys. Environment variables win.
pub fn load() -> Result<OrchestratorConfig> {
    let config: OrchestratorConfig = Figment::new()
        .merge(Serialized::defaults(OrchestratorConfig::default()))
        .merge(Yaml::file("swarm-orchestrator.yaml"))
        .merge(Yaml::file("swarm-orchestrator.local.yaml"))
        .merge(Env::prefixed("SWARM_ORCHESTRATOR_").split("__"))
        .extract()
        .context("failed to extract orchestrator configuration")?;

    validate(&config)?;
    Ok(config)
}

/// Loads configuration from a specific file, bypassing the default project-relative paths.
/// Used by tests and by callers that already know their config location.
pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<OrchestratorConfig> {
    let config: OrchestratorConfig = Figment::new()
        .merge(Serialized::defaults(OrchestratorConfig::default()))
        .merge(Yaml::file(path.as_ref()))
        .extract()
        .with_context(|| format!("failed to load config from {}", path.as_ref().display()))?;

    validate(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(validate(&OrchestratorConfig::default()).is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = OrchestratorConfig::default();
        config.max_concurrency = 0;
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroConcurrency));
    }

    #[test]
    fn multiple_errors_are_collected_together() {
        let mut config = OrchestratorConfig::default();
        config.max_concurrency = 0;
        config.quality_threshold = 9;
        let err = validate(&config).unwrap_err();
        match err {
            ConfigError::Multiple(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected Multiple, got {other:?}"),
        }
    }

    #[test]
    fn env_override_via_figment_takes_precedence() {
        temp_env::with_var("SWARM_ORCHESTRATOR_MAX_CONCURRENCY", Some("16"), || {
            let config: OrchestratorConfig = Figment::new()
                .merge(Serialized::defaults(OrchestratorConfig::default()))
                .merge(Env::prefixed("SWARM_ORCHESTRATOR_").split("__"))
                .extract()
                .unwrap();
            assert_eq!(config.max_concurrency, 16);
        });
    }
}
