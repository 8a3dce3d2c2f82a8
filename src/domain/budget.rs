//! Budget pool data model: the numbers, independent of the atomics that guard them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A snapshot of budget pool state, suitable for checkpointing or reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetPoolState {
    pub total_tokens_budget: u64,
    pub total_cost_budget: f64,
    pub deadline: Option<DateTime<Utc>>,
    pub tokens_used: u64,
    pub cost_used: f64,
    pub tokens_reserved: u64,
    pub cost_reserved: f64,
}

impl BudgetPoolState {
    #[must_use]
    pub fn tokens_remaining(&self) -> u64 {
        self.total_tokens_budget
            .saturating_sub(self.tokens_used)
            .saturating_sub(self.tokens_reserved)
    }

    #[must_use]
    pub fn cost_remaining(&self) -> f64 {
        (self.total_cost_budget - self.cost_used - self.cost_reserved).max(0.0)
    }

    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.total_tokens_budget == 0 {
            0.0
        } else {
            self.tokens_used as f64 / self.total_tokens_budget as f64
        }
    }
}
