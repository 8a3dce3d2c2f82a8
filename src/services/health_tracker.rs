//! Per-model health tracking.
//!
//! Owned exclusively by the orchestrator's decision loop ("single owner
//! mutates; workers communicate through a completion channel"), so this needs no interior
//! mutability or locking of its own.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::domain::health::HealthRecord;

/// Failure kinds the health tracker distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    RateLimit,
    SpendLimit,
    Timeout,
    Generic,
}

const EWMA_ALPHA: f64 = 0.3;
const RATE_LIMIT_WINDOW_SECS: i64 = 60;
const RATE_LIMIT_UNHEALTHY_THRESHOLD: u64 = 2;
const MIN_ATTEMPTS_FOR_FAILURE_RATE_RULE: u64 = 3;
const FAILURE_RATE_UNHEALTHY_THRESHOLD: f64 = 0.5;
const QUALITY_REJECTION_UNHEALTHY_THRESHOLD: u64 = 3;

#[derive(Debug, Clone)]
struct ModelState {
    record: HealthRecord,
    explicitly_marked_unhealthy: bool,
    rate_limit_timestamps: Vec<DateTime<Utc>>,
}

impl ModelState {
    fn new(model: &str) -> Self {
        Self {
            record: HealthRecord::new(model),
            explicitly_marked_unhealthy: false,
            rate_limit_timestamps: Vec::new(),
        }
    }

    fn recent_rate_limits(&self, now: DateTime<Utc>) -> u64 {
        let window_start = now - ChronoDuration::seconds(RATE_LIMIT_WINDOW_SECS);
        self.rate_limit_timestamps.iter().filter(|&&t| t >= window_start).count() as u64
    }

    fn recompute_healthy(&mut self, now: DateTime<Utc>) {
        let total = self.record.success_count + self.record.failure_count;
        let failure_rate = if total == 0 { 0.0 } else { self.record.failure_count as f64 / total as f64 };

        self.record.healthy = !self.explicitly_marked_unhealthy
            && self.recent_rate_limits(now) < RATE_LIMIT_UNHEALTHY_THRESHOLD
            && !(total >= MIN_ATTEMPTS_FOR_FAILURE_RATE_RULE && failure_rate > FAILURE_RATE_UNHEALTHY_THRESHOLD)
            && self.record.quality_rejection_count < QUALITY_REJECTION_UNHEALTHY_THRESHOLD;
    }
}

/// Tracks success/failure/rate-limit/hollow counters per model and the derived health
/// predicate.
#[derive(Debug, Default)]
pub struct HealthTracker {
    models: HashMap<String, ModelState>,
}

impl HealthTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, model: &str) -> &mut ModelState {
        self.models.entry(model.to_string()).or_insert_with(|| ModelState::new(model))
    }

    pub fn record_success(&mut self, model: &str, latency_ms: f64) {
        let now = Utc::now();
        let state = self.entry(model);
        state.record.success_count += 1;
        state.record.ewma_latency_ms = if state.record.success_count == 1 {
            latency_ms
        } else {
            EWMA_ALPHA * latency_ms + (1.0 - EWMA_ALPHA) * state.record.ewma_latency_ms
        };
        state.recompute_healthy(now);
    }

    pub fn record_failure(&mut self, model: &str, kind: FailureKind) {
        let now = Utc::now();
        let state = self.entry(model);
        state.record.failure_count += 1;
        if matches!(kind, FailureKind::RateLimit) {
            state.record.rate_limit_count += 1;
            state.record.last_rate_limit_at = Some(now);
            state.rate_limit_timestamps.push(now);
        }
        state.recompute_healthy(now);
    }

    /// A quality rejection arrives after a provisional success was already recorded;
    /// retroactively undo that success so the success-rate denominator stays honest.
    pub fn record_quality_rejection(&mut self, model: &str, _score: u8) {
        let now = Utc::now();
        let state = self.entry(model);
        state.record.quality_rejection_count += 1;
        if state.record.success_count > 0 {
            state.record.success_count -= 1;
            state.record.failure_count += 1;
        }
        state.recompute_healthy(now);
    }

    /// Hollow completions also record a generic failure.
    pub fn record_hollow(&mut self, model: &str) {
        self.entry(model).record.hollow_count += 1;
        self.record_failure(model, FailureKind::Generic);
    }

    pub fn mark_unhealthy(&mut self, model: &str) {
        let now = Utc::now();
        let state = self.entry(model);
        state.explicitly_marked_unhealthy = true;
        state.recompute_healthy(now);
    }

    pub fn reset_health(&mut self, model: &str) {
        let now = Utc::now();
        let state = self.entry(model);
        state.explicitly_marked_unhealthy = false;
        state.recompute_healthy(now);
    }

    #[must_use]
    pub fn is_healthy(&self, model: &str) -> bool {
        self.models.get(model).is_none_or(|s| s.record.healthy)
    }

    #[must_use]
    pub fn success_rate(&self, model: &str) -> f64 {
        self.models.get(model).map_or(1.0, |s| s.record.success_rate())
    }

    #[must_use]
    pub fn hollow_rate(&self, model: &str) -> f64 {
        self.models.get(model).map_or(0.0, |s| s.record.hollow_rate())
    }

    #[must_use]
    pub fn record(&self, model: &str) -> Option<&HealthRecord> {
        self.models.get(model).map(|s| &s.record)
    }

    #[must_use]
    pub fn all_records(&self) -> Vec<HealthRecord> {
        self.models.values().map(|s| s.record.clone()).collect()
    }

    pub fn restore(&mut self, records: Vec<HealthRecord>) {
        for record in records {
            let mut state = ModelState::new(&record.model);
            state.record = record;
            self.models.insert(state.record.model.clone(), state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_defaults_healthy() {
        let tracker = HealthTracker::new();
        assert!(tracker.is_healthy("haiku"));
        assert_eq!(tracker.success_rate("haiku"), 1.0);
    }

    #[test]
    fn two_rate_limits_within_window_mark_unhealthy() {
        let mut tracker = HealthTracker::new();
        tracker.record_failure("haiku", FailureKind::RateLimit);
        assert!(tracker.is_healthy("haiku"));
        tracker.record_failure("haiku", FailureKind::RateLimit);
        assert!(!tracker.is_healthy("haiku"));
    }

    #[test]
    fn three_attempts_over_half_failure_rate_marks_unhealthy() {
        let mut tracker = HealthTracker::new();
        tracker.record_success("haiku", 100.0);
        tracker.record_failure("haiku", FailureKind::Generic);
        tracker.record_failure("haiku", FailureKind::Generic);
        assert!(!tracker.is_healthy("haiku"));
    }

    #[test]
    fn three_quality_rejections_mark_unhealthy() {
        let mut tracker = HealthTracker::new();
        for _ in 0..3 {
            tracker.record_success("haiku", 50.0);
            tracker.record_quality_rejection("haiku", 2);
        }
        assert!(!tracker.is_healthy("haiku"));
    }

    #[test]
    fn quality_rejection_undoes_one_success() {
        let mut tracker = HealthTracker::new();
        tracker.record_success("haiku", 50.0);
        tracker.record_quality_rejection("haiku", 2);
        assert_eq!(tracker.record("haiku").unwrap().success_count, 0);
        assert_eq!(tracker.record("haiku").unwrap().failure_count, 1);
    }

    #[test]
    fn hollow_also_records_generic_failure() {
        let mut tracker = HealthTracker::new();
        tracker.record_hollow("haiku");
        let record = tracker.record("haiku").unwrap();
        assert_eq!(record.hollow_count, 1);
        assert_eq!(record.failure_count, 1);
    }

    #[test]
    fn ewma_latency_blends_samples() {
        let mut tracker = HealthTracker::new();
        tracker.record_success("haiku", 100.0);
        tracker.record_success("haiku", 200.0);
        let latency = tracker.record("haiku").unwrap().ewma_latency_ms;
        assert!((latency - (0.3 * 200.0 + 0.7 * 100.0)).abs() < 1e-9);
    }

    #[test]
    fn explicit_mark_unhealthy_overrides_good_stats() {
        let mut tracker = HealthTracker::new();
        tracker.record_success("haiku", 10.0);
        tracker.mark_unhealthy("haiku");
        assert!(!tracker.is_healthy("haiku"));
        tracker.reset_health("haiku");
        assert!(tracker.is_healthy("haiku"));
    }

    #[test]
    fn success_rate_monotonicity_never_flips_healthy_to_unhealthy_without_rate_limits() {
        let mut tracker = HealthTracker::new();
        tracker.record_failure("haiku", FailureKind::Generic);
        tracker.record_success("haiku", 10.0);
        let healthy_before = tracker.is_healthy("haiku");
        let rate_before = tracker.success_rate("haiku");
        tracker.record_success("haiku", 10.0);
        assert!(tracker.success_rate("haiku") >= rate_before);
        if healthy_before {
            assert!(tracker.is_healthy("haiku"));
        }
    }
}
