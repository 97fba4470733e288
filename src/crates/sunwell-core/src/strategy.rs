//! Execution strategy catalog and cost table
//!
//! Strategies form a cost-tiered ladder: cheap single-shot calls at the
//! bottom, exploratory multi-candidate strategies at the top. The router
//! selects from this catalog at three decision points (planning, per-task
//! execution, fix) and walks the downgrade ladder under budget pressure.
//!
//! Cost multipliers are configuration, not constants. The defaults below are
//! representative and are exposed through [`CostTable`] for calibration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named execution policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyKind {
    /// Stop and request explicit user confirmation (dangerous goal)
    Halt,

    /// Return a clarifying question to the user (confidence too low)
    Clarify,

    /// One model call, no candidates
    SingleShot,

    /// N candidate plans scored and reconciled (planning tier)
    Harmonic3,

    /// Default harmonic width
    Harmonic5,

    /// Pre-planning "why vs how" reconciliation (ambiguity, test fixes)
    Dialectic,

    /// 3 samples, pick best-scoring (mid-confidence execution)
    Interference,

    /// 6+ exploratory candidates converging on a winner (low confidence)
    Vortex,

    /// Deterministic formatter/fixer pass, no model call
    ToolchainAutofix,

    /// Single targeted region edit
    DirectFix,

    /// Add import / install dependency / correct path
    DependencyResolve,

    /// Combined spatial + temporal hotspot localization, then VORTEX
    HotspotScan,

    /// Spatial-only hotspot localization (downgraded HOTSPOT_SCAN)
    LateralOnly,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Halt => "HALT",
            StrategyKind::Clarify => "CLARIFY",
            StrategyKind::SingleShot => "SINGLE_SHOT",
            StrategyKind::Harmonic3 => "HARMONIC_3",
            StrategyKind::Harmonic5 => "HARMONIC_5",
            StrategyKind::Dialectic => "DIALECTIC",
            StrategyKind::Interference => "INTERFERENCE",
            StrategyKind::Vortex => "VORTEX",
            StrategyKind::ToolchainAutofix => "TOOLCHAIN_AUTOFIX",
            StrategyKind::DirectFix => "DIRECT_FIX",
            StrategyKind::DependencyResolve => "DEPENDENCY_RESOLVE",
            StrategyKind::HotspotScan => "HOTSPOT_SCAN",
            StrategyKind::LateralOnly => "LATERAL_ONLY",
        }
    }

    /// Number of model candidates the strategy generates
    pub fn candidates(&self) -> usize {
        match self {
            StrategyKind::Harmonic5 => 5,
            StrategyKind::Harmonic3 => 3,
            StrategyKind::Interference => 3,
            StrategyKind::Vortex => 6,
            StrategyKind::Dialectic => 2,
            StrategyKind::Halt | StrategyKind::Clarify | StrategyKind::ToolchainAutofix => 0,
            _ => 1,
        }
    }

    /// One step down the budget-pressure ladder, or `None` at the floor.
    ///
    /// VORTEX → INTERFERENCE → SINGLE_SHOT
    /// HARMONIC_5 → HARMONIC_3 → SINGLE_SHOT
    /// HOTSPOT_SCAN → LATERAL_ONLY → DIRECT_FIX
    pub fn downgrade(&self) -> Option<StrategyKind> {
        match self {
            StrategyKind::Vortex => Some(StrategyKind::Interference),
            StrategyKind::Interference => Some(StrategyKind::SingleShot),
            StrategyKind::Harmonic5 => Some(StrategyKind::Harmonic3),
            StrategyKind::Harmonic3 => Some(StrategyKind::SingleShot),
            StrategyKind::HotspotScan => Some(StrategyKind::LateralOnly),
            StrategyKind::LateralOnly => Some(StrategyKind::DirectFix),
            StrategyKind::Dialectic => Some(StrategyKind::SingleShot),
            _ => None,
        }
    }

    /// True for terminal routing outcomes that never invoke the model
    pub fn is_terminal(&self) -> bool {
        matches!(self, StrategyKind::Halt | StrategyKind::Clarify)
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A selected strategy with its resolved cost parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub kind: StrategyKind,

    /// Multiplier over the base task cost; total order drives downgrade
    pub cost_multiplier: f64,

    /// Maximum sibling parallelism when applying this strategy
    pub parallelism: usize,

    /// Bounded retry attempts within the strategy
    pub max_attempts: u32,
}

/// Configurable strategy cost table
///
/// Multipliers are deliberately configuration: the shipped defaults are
/// representative values, overridable from `sunwell.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostTable {
    /// Estimated tokens for one SINGLE_SHOT task execution
    pub base_task_cost: u64,

    /// Per-strategy multipliers over `base_task_cost`
    pub multipliers: BTreeMap<StrategyKind, f64>,
}

impl Default for CostTable {
    fn default() -> Self {
        let mut multipliers = BTreeMap::new();
        multipliers.insert(StrategyKind::Halt, 0.0);
        multipliers.insert(StrategyKind::Clarify, 0.0);
        multipliers.insert(StrategyKind::ToolchainAutofix, 0.0);
        multipliers.insert(StrategyKind::SingleShot, 1.0);
        multipliers.insert(StrategyKind::DirectFix, 1.0);
        multipliers.insert(StrategyKind::DependencyResolve, 1.0);
        multipliers.insert(StrategyKind::Dialectic, 2.0);
        multipliers.insert(StrategyKind::LateralOnly, 2.0);
        multipliers.insert(StrategyKind::Interference, 3.0);
        multipliers.insert(StrategyKind::Harmonic3, 3.0);
        multipliers.insert(StrategyKind::Harmonic5, 5.0);
        multipliers.insert(StrategyKind::Vortex, 6.0);
        multipliers.insert(StrategyKind::HotspotScan, 6.0);
        Self {
            base_task_cost: 2_000,
            multipliers,
        }
    }
}

impl CostTable {
    /// Multiplier for a strategy kind; unknown kinds cost a single shot.
    pub fn multiplier(&self, kind: StrategyKind) -> f64 {
        self.multipliers.get(&kind).copied().unwrap_or(1.0)
    }

    /// Estimated token cost of applying `kind` once
    pub fn estimated_cost(&self, kind: StrategyKind) -> u64 {
        (self.multiplier(kind) * self.base_task_cost as f64).ceil() as u64
    }

    /// Resolve a kind into a full [`Strategy`] with cost parameters
    pub fn strategy(&self, kind: StrategyKind) -> Strategy {
        Strategy {
            kind,
            cost_multiplier: self.multiplier(kind),
            parallelism: kind.candidates().max(1),
            max_attempts: match kind {
                StrategyKind::DirectFix | StrategyKind::DependencyResolve => 3,
                _ => 1,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downgrade_ladders_reach_floor() {
        // Each ladder terminates at a non-downgradeable strategy.
        let mut kind = StrategyKind::Vortex;
        let mut steps = 0;
        while let Some(next) = kind.downgrade() {
            kind = next;
            steps += 1;
            assert!(steps < 10, "downgrade ladder must terminate");
        }
        assert_eq!(kind, StrategyKind::SingleShot);

        let mut kind = StrategyKind::HotspotScan;
        while let Some(next) = kind.downgrade() {
            kind = next;
        }
        assert_eq!(kind, StrategyKind::DirectFix);

        let mut kind = StrategyKind::Harmonic5;
        while let Some(next) = kind.downgrade() {
            kind = next;
        }
        assert_eq!(kind, StrategyKind::SingleShot);
    }

    #[test]
    fn test_downgrade_strictly_cheaper() {
        let table = CostTable::default();
        for kind in [
            StrategyKind::Vortex,
            StrategyKind::Interference,
            StrategyKind::Harmonic5,
            StrategyKind::Harmonic3,
            StrategyKind::HotspotScan,
            StrategyKind::LateralOnly,
        ] {
            let next = kind.downgrade().unwrap();
            assert!(
                table.multiplier(next) < table.multiplier(kind),
                "{} must downgrade to something cheaper, got {}",
                kind.name(),
                next.name()
            );
        }
    }

    #[test]
    fn test_terminal_strategies_cost_nothing() {
        let table = CostTable::default();
        assert_eq!(table.estimated_cost(StrategyKind::Halt), 0);
        assert_eq!(table.estimated_cost(StrategyKind::Clarify), 0);
        assert_eq!(table.estimated_cost(StrategyKind::ToolchainAutofix), 0);
    }

    #[test]
    fn test_strategy_resolution() {
        let table = CostTable::default();
        let s = table.strategy(StrategyKind::Vortex);
        assert_eq!(s.parallelism, 6);
        assert_eq!(s.cost_multiplier, 6.0);

        let s = table.strategy(StrategyKind::DirectFix);
        assert_eq!(s.max_attempts, 3);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&StrategyKind::SingleShot).unwrap(),
            "\"SINGLE_SHOT\""
        );
        assert_eq!(
            serde_json::to_string(&StrategyKind::HotspotScan).unwrap(),
            "\"HOTSPOT_SCAN\""
        );
    }
}
