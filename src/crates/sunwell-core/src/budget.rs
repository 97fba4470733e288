//! Token budget with a held-back fix reserve
//!
//! One budget exists per session. `spent` is monotonically non-decreasing;
//! a fixed fraction of the total is held in reserve for the fix phase and
//! never available to planning or execution strategies. Once an ideal
//! strategy stops being affordable, the router walks the downgrade ladder.

use crate::error::{CoreError, Result};
use crate::strategy::{CostTable, StrategyKind};
use serde::{Deserialize, Serialize};

/// Fraction of the total held back for the fix phase
pub const DEFAULT_RESERVE_FRACTION: f64 = 0.20;

/// Session token budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    /// Total tokens available for the session
    pub total: u64,

    /// Tokens consumed so far; only ever increases
    spent: u64,

    /// Tokens held back for the fix phase
    pub reserve: u64,
}

impl Budget {
    /// Create a budget with the default 20% fix reserve
    pub fn new(total: u64) -> Self {
        Self::with_reserve_fraction(total, DEFAULT_RESERVE_FRACTION)
    }

    /// Create a budget holding back `fraction` of the total for fixes
    pub fn with_reserve_fraction(total: u64, fraction: f64) -> Self {
        let reserve = (total as f64 * fraction.clamp(0.0, 1.0)).floor() as u64;
        Self {
            total,
            spent: 0,
            reserve,
        }
    }

    pub fn spent(&self) -> u64 {
        self.spent
    }

    /// Tokens still spendable outside the reserve
    pub fn available(&self) -> u64 {
        self.total.saturating_sub(self.spent + self.reserve)
    }

    /// Record tokens consumed by a strategy application.
    ///
    /// Spending is never rejected after the fact (the call already happened);
    /// the router consults [`Budget::is_affordable`] before committing.
    pub fn charge(&mut self, tokens: u64) {
        self.spent = self.spent.saturating_add(tokens);
        tracing::debug!(
            spent = self.spent,
            total = self.total,
            "budget charge recorded"
        );
    }

    /// Affordability test from the routing contract:
    /// `spent + multiplier * base_task_cost + reserve <= total`.
    pub fn is_affordable(&self, kind: StrategyKind, costs: &CostTable) -> bool {
        let projected = self.spent + costs.estimated_cost(kind) + self.reserve;
        projected <= self.total
    }

    /// True once even a SINGLE_SHOT no longer fits outside the reserve
    pub fn is_under_pressure(&self, costs: &CostTable) -> bool {
        !self.is_affordable(StrategyKind::SingleShot, costs)
    }

    /// During the fix phase the reserve is spendable; only the hard total
    /// bounds fixes.
    pub fn is_affordable_for_fix(&self, kind: StrategyKind, costs: &CostTable) -> bool {
        self.spent + costs.estimated_cost(kind) <= self.total
    }

    /// Error value for the exhausted terminal state
    pub fn exhausted_error(&self) -> CoreError {
        CoreError::BudgetExhausted {
            spent: self.spent,
            total: self.total,
            reserve: self.reserve,
        }
    }

    /// Validate the structural invariant `spent + reserve <= total` held at
    /// admission time (spending past it is possible but flags pressure).
    pub fn check(&self) -> Result<()> {
        if self.reserve > self.total {
            return Err(CoreError::Config(format!(
                "budget reserve {} exceeds total {}",
                self.reserve, self.total
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reserve_fraction() {
        let b = Budget::new(100_000);
        assert_eq!(b.reserve, 20_000);
        assert_eq!(b.available(), 80_000);
    }

    #[test]
    fn test_affordability_boundary() {
        let costs = CostTable::default(); // base 2_000
        let mut b = Budget::new(10_000); // reserve 2_000
        // SINGLE_SHOT: 0 + 2000 + 2000 <= 10000
        assert!(b.is_affordable(StrategyKind::SingleShot, &costs));
        // VORTEX: 0 + 12000 + 2000 > 10000
        assert!(!b.is_affordable(StrategyKind::Vortex, &costs));

        b.charge(6_001);
        // 6001 + 2000 + 2000 > 10000
        assert!(!b.is_affordable(StrategyKind::SingleShot, &costs));
        // fix phase may dip into the reserve: 6001 + 2000 <= 10000
        assert!(b.is_affordable_for_fix(StrategyKind::DirectFix, &costs));
    }

    #[test]
    fn test_charge_saturates() {
        let mut b = Budget::new(100);
        b.charge(u64::MAX);
        b.charge(10);
        assert_eq!(b.spent(), u64::MAX);
    }

    proptest! {
        // spent is monotonically non-decreasing under any charge sequence.
        #[test]
        fn prop_budget_monotonic(charges in proptest::collection::vec(0u64..50_000, 0..64)) {
            let mut b = Budget::new(1_000_000);
            let mut last = b.spent();
            for c in charges {
                b.charge(c);
                prop_assert!(b.spent() >= last);
                last = b.spent();
            }
        }

        // Affordability never admits a strategy that would breach the total.
        #[test]
        fn prop_affordable_within_total(total in 1_000u64..1_000_000, pre in 0u64..1_000_000) {
            let costs = CostTable::default();
            let mut b = Budget::new(total);
            b.charge(pre);
            for kind in [StrategyKind::SingleShot, StrategyKind::Interference, StrategyKind::Vortex] {
                if b.is_affordable(kind, &costs) {
                    prop_assert!(b.spent() + costs.estimated_cost(kind) + b.reserve <= b.total);
                }
            }
        }
    }
}
