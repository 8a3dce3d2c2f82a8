//! Per-model health record data model.

use serde::{Deserialize, Serialize};

/// Point-in-time health data for one model, as captured by the health tracker and
/// persisted into checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub model: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub rate_limit_count: u64,
    pub last_rate_limit_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ewma_latency_ms: f64,
    pub healthy: bool,
    pub quality_rejection_count: u64,
    pub hollow_count: u64,
}

impl HealthRecord {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            success_count: 0,
            failure_count: 0,
            rate_limit_count: 0,
            last_rate_limit_at: None,
            ewma_latency_ms: 0.0,
            healthy: true,
            quality_rejection_count: 0,
            hollow_count: 0,
        }
    }

    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    #[must_use]
    pub fn hollow_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.0
        } else {
            self.hollow_count as f64 / total as f64
        }
    }
}
