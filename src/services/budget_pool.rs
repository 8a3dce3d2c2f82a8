//! Token/cost/time budget tracking with atomic check-and-reserve semantics.
//!
//! One global token bucket and one cost bucket, guarded by `AtomicU64` CAS loops so
//! concurrent dispatches racing to reserve cannot both observe capacity and overshoot it
//! (the same discipline the rest of the codebase uses for its runtime metrics). Cost is
//! tracked as a fixed-point integer (hundredths of a cent) so it can share the same
//! atomic machinery as the token bucket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::domain::budget::BudgetPoolState;
use crate::error::{OrchestratorError, OrchestratorResult};

const COST_SCALE: f64 = 10_000.0;

fn cost_to_fixed(cost: f64) -> u64 {
    (cost.max(0.0) * COST_SCALE).round() as u64
}

fn fixed_to_cost(fixed: u64) -> f64 {
    fixed as f64 / COST_SCALE
}

/// A live reservation against the pool. Must be released exactly once.
#[derive(Debug, Clone, Copy)]
pub struct ReservationHandle {
    pub id: Uuid,
    pub tokens_reserved: u64,
    pub cost_reserved_fixed: u64,
}

/// Shared token/cost/time budget pool.
#[derive(Debug)]
pub struct BudgetPool {
    total_tokens_budget: u64,
    total_cost_budget_fixed: u64,
    deadline: Option<Instant>,
    tokens_used: AtomicU64,
    cost_used_fixed: AtomicU64,
    tokens_reserved: AtomicU64,
    cost_reserved_fixed: AtomicU64,
    overshot: std::sync::atomic::AtomicBool,
}

impl BudgetPool {
    #[must_use]
    pub fn new(total_tokens_budget: u64, total_cost_budget: f64, time_budget: Option<Duration>) -> Self {
        Self {
            total_tokens_budget,
            total_cost_budget_fixed: cost_to_fixed(total_cost_budget),
            deadline: time_budget.map(|d| Instant::now() + d),
            tokens_used: AtomicU64::new(0),
            cost_used_fixed: AtomicU64::new(0),
            tokens_reserved: AtomicU64::new(0),
            cost_reserved_fixed: AtomicU64::new(0),
            overshot: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Atomically reserves `tokens`/`cost` if capacity allows, otherwise returns
    /// `BudgetExhausted` without mutating anything.
    pub fn reserve(&self, tokens: u64, cost: f64) -> OrchestratorResult<ReservationHandle> {
        let cost_fixed = cost_to_fixed(cost);

        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(OrchestratorError::BudgetExhausted);
        }

        let reserved_tokens = self
            .tokens_reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                let used = self.tokens_used.load(Ordering::SeqCst);
                if used + current + tokens > self.total_tokens_budget {
                    None
                } else {
                    Some(current + tokens)
                }
            });
        if reserved_tokens.is_err() {
            return Err(OrchestratorError::BudgetExhausted);
        }

        let reserved_cost = self
            .cost_reserved_fixed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                let used = self.cost_used_fixed.load(Ordering::SeqCst);
                if used + current + cost_fixed > self.total_cost_budget_fixed {
                    None
                } else {
                    Some(current + cost_fixed)
                }
            });
        if reserved_cost.is_err() {
            // Roll back the token reservation we just took.
            self.tokens_reserved.fetch_sub(tokens, Ordering::SeqCst);
            return Err(OrchestratorError::BudgetExhausted);
        }

        Ok(ReservationHandle { id: Uuid::new_v4(), tokens_reserved: tokens, cost_reserved_fixed: cost_fixed })
    }

    /// Reconciles a reservation against actual usage: surplus returns to the pool,
    /// overage is recorded best-effort and flips `has_capacity` false on the next check.
    pub fn release(&self, handle: ReservationHandle, actual_tokens: u64, actual_cost: f64) {
        self.tokens_reserved.fetch_sub(handle.tokens_reserved, Ordering::SeqCst);
        self.cost_reserved_fixed.fetch_sub(handle.cost_reserved_fixed, Ordering::SeqCst);
        self.tokens_used.fetch_add(actual_tokens, Ordering::SeqCst);
        self.cost_used_fixed.fetch_add(cost_to_fixed(actual_cost), Ordering::SeqCst);

        if actual_tokens > handle.tokens_reserved || cost_to_fixed(actual_cost) > handle.cost_reserved_fixed {
            self.overshot.store(true, Ordering::SeqCst);
        }
    }

    #[must_use]
    pub fn has_capacity(&self) -> bool {
        if self.overshot.load(Ordering::SeqCst) {
            return false;
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return false;
        }
        self.stats().tokens_remaining() > 0 && self.stats().cost_remaining() > 0.0
    }

    #[must_use]
    pub fn stats(&self) -> BudgetPoolState {
        BudgetPoolState {
            total_tokens_budget: self.total_tokens_budget,
            total_cost_budget: fixed_to_cost(self.total_cost_budget_fixed),
            deadline: None,
            tokens_used: self.tokens_used.load(Ordering::SeqCst),
            cost_used: fixed_to_cost(self.cost_used_fixed.load(Ordering::SeqCst)),
            tokens_reserved: self.tokens_reserved.load(Ordering::SeqCst),
            cost_reserved: fixed_to_cost(self.cost_reserved_fixed.load(Ordering::SeqCst)),
        }
    }

    /// Releases reservations back to the pool's theoretical capacity, used at wave
    /// boundaries to log budget reallocation.
    #[must_use]
    pub fn reallocate_unused(&self) -> u64 {
        self.stats().tokens_remaining()
    }

    /// Restores `tokens_used`/`cost_used` from a checkpointed snapshot. Reservations are
    /// never restored: any in-flight reservation at checkpoint time belonged to a dispatch
    /// that did not survive the restart, so it has nothing left to reconcile against.
    pub fn restore(&self, state: &BudgetPoolState) {
        self.tokens_used.store(state.tokens_used, Ordering::SeqCst);
        self.cost_used_fixed.store(cost_to_fixed(state.cost_used), Ordering::SeqCst);
        self.tokens_reserved.store(0, Ordering::SeqCst);
        self.cost_reserved_fixed.store(0, Ordering::SeqCst);
    }
}
