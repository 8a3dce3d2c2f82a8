//! Global dispatch pause triggered by a rate-limit burst.
//!
//! Distinct from the quality gate's per-model judge breaker: this one pauses *all*
//! dispatch when rate limits cluster within a short window, regardless of which model hit
//! them, and reopens automatically after a cooldown.

use std::time::{Duration, Instant};

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(30);
const RATE_LIMIT_TRIP_THRESHOLD: usize = 3;
const OPEN_COOLDOWN: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
}

/// Global rate-limit circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    rate_limit_timestamps: Vec<Instant>,
    state: CircuitState,
    opened_at: Option<Instant>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new() -> Self {
        Self { rate_limit_timestamps: Vec::new(), state: CircuitState::Closed, opened_at: None }
    }

    /// Records a rate-limit event, possibly tripping the breaker open. Returns `true` if
    /// this call caused the breaker to trip (so callers can emit `circuit.open` exactly
    /// once).
    pub fn record_rate_limit(&mut self) -> bool {
        let now = Instant::now();
        self.rate_limit_timestamps.push(now);
        self.rate_limit_timestamps.retain(|&t| now.duration_since(t) <= RATE_LIMIT_WINDOW);

        if self.state == CircuitState::Closed && self.rate_limit_timestamps.len() >= RATE_LIMIT_TRIP_THRESHOLD {
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
            return true;
        }
        false
    }

    /// Call before every dispatch decision: transitions `Open` back to `Closed` once the
    /// cooldown has elapsed, returning `true` exactly on the call that closes it.
    pub fn tick(&mut self) -> bool {
        if self.state == CircuitState::Open {
            if let Some(opened_at) = self.opened_at {
                if opened_at.elapsed() >= OPEN_COOLDOWN {
                    self.state = CircuitState::Closed;
                    self.opened_at = None;
                    self.rate_limit_timestamps.clear();
                    return true;
                }
            }
        }
        false
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    #[must_use]
    pub fn cooldown_remaining(&self) -> Duration {
        match self.opened_at {
            Some(opened_at) => OPEN_COOLDOWN.saturating_sub(opened_at.elapsed()),
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_until_three_rate_limits_within_window() {
        let mut breaker = CircuitBreaker::new();
        assert!(!breaker.record_rate_limit());
        assert!(!breaker.record_rate_limit());
        assert!(breaker.record_rate_limit());
        assert!(breaker.is_open());
    }

    #[test]
    fn tick_before_cooldown_elapses_stays_open() {
        let mut breaker = CircuitBreaker::new();
        for _ in 0..3 {
            breaker.record_rate_limit();
        }
        assert!(breaker.is_open());
        assert!(!breaker.tick());
        assert!(breaker.is_open());
    }

    #[test]
    fn single_rate_limit_does_not_trip() {
        let mut breaker = CircuitBreaker::new();
        breaker.record_rate_limit();
        assert!(!breaker.is_open());
    }
}
