//! Router and budget governor
//!
//! Pure, total mapping from (signal vector, budget state) to strategies at
//! the three decision points: planning, per-task execution, and fix. HALT
//! and CLARIFY are terminal routing outcomes, not errors. Under budget
//! pressure the router walks each strategy's downgrade ladder until the
//! choice is affordable, bottoming out at the ladder floor.

use sunwell_core::budget::Budget;
use sunwell_core::gate::ValidationErrorKind;
use sunwell_core::signal::{SignalVector, Tri};
use sunwell_core::strategy::{CostTable, StrategyKind};
use sunwell_core::task::TaskSpec;
use tracing::debug;

/// Confidence below which routing demands clarification
pub const CLARIFY_THRESHOLD: f64 = 0.3;

/// Routing engine; stateless beyond its cost table
#[derive(Debug, Clone)]
pub struct Router {
    costs: CostTable,
}

impl Router {
    pub fn new(costs: CostTable) -> Self {
        Self { costs }
    }

    pub fn costs(&self) -> &CostTable {
        &self.costs
    }

    /// Select the planning strategy.
    ///
    /// Rules, in precedence order: dangerous ⇒ HALT; confidence < 0.3 ⇒ CLARIFY;
    /// ambiguous ⇒ DIALECTIC; complexity NO ⇒ SINGLE_SHOT; complexity YES ⇒
    /// HARMONIC_5 (subject to downgrade).
    pub fn route_planning(&self, signals: &SignalVector, budget: &Budget) -> StrategyKind {
        if signals.is_dangerous == Tri::Yes {
            return StrategyKind::Halt;
        }
        if signals.confidence < CLARIFY_THRESHOLD {
            return StrategyKind::Clarify;
        }
        let ideal = if signals.is_ambiguous == Tri::Yes {
            StrategyKind::Dialectic
        } else if signals.complexity == Tri::No {
            StrategyKind::SingleShot
        } else if signals.complexity == Tri::Yes {
            StrategyKind::Harmonic5
        } else {
            StrategyKind::SingleShot
        };
        self.downgrade_until_affordable(ideal, budget, false)
    }

    /// Select the execution strategy for one task from its confidence
    pub fn route_task(&self, _signals: &SignalVector, task: &TaskSpec, budget: &Budget) -> StrategyKind {
        let ideal = if task.confidence >= 0.85 {
            StrategyKind::SingleShot
        } else if task.confidence >= 0.6 {
            StrategyKind::Interference
        } else if task.confidence >= CLARIFY_THRESHOLD {
            StrategyKind::Vortex
        } else {
            return StrategyKind::Clarify;
        };
        self.downgrade_until_affordable(ideal, budget, false)
    }

    /// Select the fix strategy from the error kind.
    ///
    /// `hotspot_scale` is the size of the implicated region in lines; a very
    /// large runtime hotspot still starts from HOTSPOT_SCAN but downgrade
    /// pressure applies sooner because the scan costs more.
    pub fn route_fix(
        &self,
        error_kind: ValidationErrorKind,
        _hotspot_scale: usize,
        budget: &Budget,
    ) -> StrategyKind {
        let ideal = match error_kind {
            // Deterministic pass first; the fixer falls through to
            // DIRECT_FIX for residuals on its own.
            ValidationErrorKind::Syntax | ValidationErrorKind::Lint => {
                StrategyKind::ToolchainAutofix
            }
            ValidationErrorKind::Type => StrategyKind::DirectFix,
            ValidationErrorKind::Import => StrategyKind::DependencyResolve,
            ValidationErrorKind::Runtime => StrategyKind::HotspotScan,
            ValidationErrorKind::Test => StrategyKind::Dialectic,
            // A timed-out gate looks like a runtime hang: scan for it.
            ValidationErrorKind::Timeout => StrategyKind::HotspotScan,
        };
        self.downgrade_until_affordable(ideal, budget, true)
    }

    /// Record tokens consumed by a strategy application
    pub fn account(&self, strategy: StrategyKind, tokens_used: u64, budget: &mut Budget) {
        budget.charge(tokens_used);
        debug!(
            strategy = strategy.name(),
            tokens = tokens_used,
            spent = budget.spent(),
            total = budget.total,
            "strategy cost accounted"
        );
    }

    /// Walk the downgrade ladder until the strategy is affordable or the
    /// ladder floor is reached. Total: always returns a choice.
    fn downgrade_until_affordable(
        &self,
        ideal: StrategyKind,
        budget: &Budget,
        fix_phase: bool,
    ) -> StrategyKind {
        let affordable = |kind: StrategyKind| {
            if fix_phase {
                budget.is_affordable_for_fix(kind, &self.costs)
            } else {
                budget.is_affordable(kind, &self.costs)
            }
        };

        let mut kind = ideal;
        while !affordable(kind) {
            match kind.downgrade() {
                Some(next) => {
                    debug!(
                        from = kind.name(),
                        to = next.name(),
                        "budget pressure downgrade"
                    );
                    kind = next;
                }
                None => break,
            }
        }
        kind
    }

    /// True when even the floor strategy no longer fits the hard total;
    /// the executor escalates on this.
    pub fn is_exhausted(&self, budget: &Budget) -> bool {
        !budget.is_affordable_for_fix(StrategyKind::SingleShot, &self.costs)
    }

    /// Post-hoc briefing dispatch hints from the remaining work.
    ///
    /// Rule-based on purpose: the hints prime the next session's prefetch,
    /// they never influence correctness.
    pub fn dispatch_hints(
        &self,
        pending_tasks: usize,
        artifact_languages: &[String],
    ) -> DispatchHints {
        let mut skills: Vec<String> = Vec::new();
        for language in artifact_languages {
            if !skills.contains(language) {
                skills.push(language.clone());
            }
        }
        let complexity = match pending_tasks {
            0 => "low",
            1..=3 => "medium",
            _ => "high",
        };
        DispatchHints {
            suggested_lens: skills.first().cloned(),
            predicted_skills: skills,
            complexity_estimate: Some(complexity.to_string()),
            estimated_files_touched: Some(pending_tasks as u32),
        }
    }
}

/// Briefing dispatch hints, filled in by the router after execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchHints {
    pub predicted_skills: Vec<String>,
    pub suggested_lens: Option<String>,
    pub complexity_estimate: Option<String>,
    pub estimated_files_touched: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sunwell_core::task::ArtifactKind;

    fn signals(complexity: Tri, ambiguous: Tri, dangerous: Tri, confidence: f64) -> SignalVector {
        SignalVector {
            complexity,
            needs_tools: Tri::Maybe,
            is_ambiguous: ambiguous,
            is_dangerous: dangerous,
            confidence,
            domain: None,
            toolchain_hint: None,
            degraded: false,
        }
    }

    fn rich_budget() -> Budget {
        Budget::new(1_000_000)
    }

    #[test]
    fn test_planning_table() {
        let router = Router::new(CostTable::default());
        let budget = rich_budget();

        assert_eq!(
            router.route_planning(&signals(Tri::No, Tri::No, Tri::Yes, 0.9), &budget),
            StrategyKind::Halt
        );
        assert_eq!(
            router.route_planning(&signals(Tri::No, Tri::No, Tri::No, 0.2), &budget),
            StrategyKind::Clarify
        );
        assert_eq!(
            router.route_planning(&signals(Tri::Yes, Tri::Yes, Tri::No, 0.9), &budget),
            StrategyKind::Dialectic
        );
        assert_eq!(
            router.route_planning(&signals(Tri::No, Tri::No, Tri::No, 0.9), &budget),
            StrategyKind::SingleShot
        );
        assert_eq!(
            router.route_planning(&signals(Tri::Yes, Tri::No, Tri::No, 0.9), &budget),
            StrategyKind::Harmonic5
        );
    }

    #[test]
    fn test_danger_beats_everything() {
        let router = Router::new(CostTable::default());
        // Even with rock-bottom confidence, danger halts first.
        assert_eq!(
            router.route_planning(&signals(Tri::Yes, Tri::Yes, Tri::Yes, 0.1), &rich_budget()),
            StrategyKind::Halt
        );
    }

    #[test]
    fn test_task_confidence_bands() {
        let router = Router::new(CostTable::default());
        let budget = rich_budget();
        let s = signals(Tri::Yes, Tri::No, Tri::No, 0.9);
        let task = |c: f64| {
            TaskSpec::new("t", "x", ArtifactKind::Module).with_confidence(c)
        };

        assert_eq!(router.route_task(&s, &task(0.9), &budget), StrategyKind::SingleShot);
        assert_eq!(router.route_task(&s, &task(0.85), &budget), StrategyKind::SingleShot);
        assert_eq!(router.route_task(&s, &task(0.7), &budget), StrategyKind::Interference);
        assert_eq!(router.route_task(&s, &task(0.4), &budget), StrategyKind::Vortex);
        assert_eq!(router.route_task(&s, &task(0.1), &budget), StrategyKind::Clarify);
    }

    #[test]
    fn test_fix_table() {
        let router = Router::new(CostTable::default());
        let budget = rich_budget();
        let route = |kind| router.route_fix(kind, 10, &budget);

        assert_eq!(route(ValidationErrorKind::Syntax), StrategyKind::ToolchainAutofix);
        assert_eq!(route(ValidationErrorKind::Lint), StrategyKind::ToolchainAutofix);
        assert_eq!(route(ValidationErrorKind::Type), StrategyKind::DirectFix);
        assert_eq!(route(ValidationErrorKind::Import), StrategyKind::DependencyResolve);
        assert_eq!(route(ValidationErrorKind::Runtime), StrategyKind::HotspotScan);
        assert_eq!(route(ValidationErrorKind::Test), StrategyKind::Dialectic);
    }

    #[test]
    fn test_budget_pressure_downgrades_transitively() {
        let router = Router::new(CostTable::default()); // base 2_000
        // total 10_000, reserve 2_000: VORTEX (12_000) and INTERFERENCE
        // (6_000 + 2_000 + spent 1_000) both unaffordable after some spend.
        let mut budget = Budget::new(10_000);
        budget.charge(1_500);

        let s = signals(Tri::Yes, Tri::No, Tri::No, 0.9);
        let task = TaskSpec::new("t", "x", ArtifactKind::Module).with_confidence(0.4);
        // Ideal VORTEX → INTERFERENCE → SINGLE_SHOT under pressure.
        assert_eq!(router.route_task(&s, &task, &budget), StrategyKind::SingleShot);
    }

    #[test]
    fn test_fix_phase_can_spend_reserve() {
        let router = Router::new(CostTable::default());
        let mut budget = Budget::new(10_000); // reserve 2_000
        budget.charge(7_000);
        // Execution phase: nothing fits (7_000 + 2_000 + 2_000 > 10_000).
        let s = signals(Tri::Yes, Tri::No, Tri::No, 0.9);
        let task = TaskSpec::new("t", "x", ArtifactKind::Module).with_confidence(0.9);
        assert_eq!(router.route_task(&s, &task, &budget), StrategyKind::SingleShot);
        // Fix phase dips into the reserve: DIRECT_FIX affordable.
        assert_eq!(
            router.route_fix(ValidationErrorKind::Type, 5, &budget),
            StrategyKind::DirectFix
        );
        assert!(!router.is_exhausted(&budget));

        budget.charge(1_500);
        assert!(router.is_exhausted(&budget));
    }

    #[test]
    fn test_routing_total() {
        // Routing always yields a choice even with a zeroed budget.
        let router = Router::new(CostTable::default());
        let mut budget = Budget::new(100);
        budget.charge(10_000);
        let s = signals(Tri::Yes, Tri::No, Tri::No, 0.9);
        assert_eq!(router.route_planning(&s, &budget), StrategyKind::SingleShot);
    }

    #[test]
    fn test_account_monotone() {
        let router = Router::new(CostTable::default());
        let mut budget = Budget::new(100_000);
        router.account(StrategyKind::SingleShot, 1_234, &mut budget);
        router.account(StrategyKind::Vortex, 4_321, &mut budget);
        assert_eq!(budget.spent(), 5_555);
    }
}
