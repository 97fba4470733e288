//! Closed configuration value types
//!
//! Every tunable lives in one of the per-component config structs below,
//! enumerated and defaulted in one place: no open kwargs bags. The file
//! format is TOML (`sunwell.toml` at the project root); `AGENT_*`
//! environment variables overlay the file.

use crate::error::{CoreError, Result};
use crate::strategy::CostTable;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration, one section per component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SunwellConfig {
    pub budget: BudgetConfig,
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
    pub gates: GateConfig,
    pub coordinator: CoordinatorConfig,
    pub memory: MemoryConfig,
    pub llm: LlmConfig,
    pub costs: CostTable,
}

/// Token budget settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Total tokens per session
    pub total_tokens: u64,

    /// Fraction of the total held for the fix phase
    pub reserve_fraction: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            total_tokens: 1_000_000,
            reserve_fraction: 0.20,
        }
    }
}

/// Planner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Candidate count for HARMONIC planning
    pub harmonic_candidates: usize,

    /// Learnings injected into the planning prompt
    pub max_learnings_in_prompt: usize,

    /// Dead ends injected into the planning prompt
    pub max_dead_ends_in_prompt: usize,

    /// Agreement at or above which the harmonic winner is taken directly
    pub agreement_pick_threshold: f64,

    /// Agreement below which planning surfaces a clarification
    pub agreement_clarify_threshold: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            harmonic_candidates: 5,
            max_learnings_in_prompt: 5,
            max_dead_ends_in_prompt: 5,
            agreement_pick_threshold: 0.8,
            agreement_clarify_threshold: 0.5,
        }
    }
}

/// Task graph executor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Parallel tasks within one gate feeder group
    pub max_concurrent_tasks: usize,

    /// Retries with fresh seeds before a task is recorded failed
    pub max_retries_per_task: u32,

    /// Fix attempts per validation error before escalation
    pub max_fix_attempts: u32,

    /// Per-task model call timeout
    pub task_timeout_secs: u64,

    /// Signal extraction timeout
    pub signal_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            max_retries_per_task: 2,
            max_fix_attempts: 3,
            task_timeout_secs: 60,
            signal_timeout_secs: 10,
        }
    }
}

/// Validation gate settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Total time allowed for one gate attempt
    pub timeout_secs: u64,

    /// First readiness-probe backoff step
    pub readiness_initial_ms: u64,

    /// Readiness-probe backoff ceiling
    pub readiness_max_ms: u64,

    /// Grace period before a probed subprocess is killed
    pub grace_period_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            readiness_initial_ms: 50,
            readiness_max_ms: 1_000,
            grace_period_secs: 5,
        }
    }
}

/// Multi-worker coordinator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Worker process count; 1 disables coordination
    pub workers: usize,

    /// Worker branch prefix: `<prefix>/worker-{i}`
    pub branch_prefix: String,

    /// File-lock acquire timeout
    pub lock_timeout_secs: u64,

    /// Lock files older than this with no live holder are reclaimed
    pub stale_lock_secs: u64,

    /// Heartbeat write interval
    pub heartbeat_interval_secs: u64,

    /// Heartbeat age at which a worker is treated as stuck
    pub worker_stuck_secs: u64,

    /// Hard ceiling on one worker's total runtime
    pub worker_total_secs: u64,

    /// System-wide concurrent model calls across all workers
    pub max_concurrent_llm_calls: usize,

    /// Delete worker branches after a clean merge
    pub delete_merged_branches: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            branch_prefix: "sunwell".to_string(),
            lock_timeout_secs: 30,
            stale_lock_secs: 60,
            heartbeat_interval_secs: 5,
            worker_stuck_secs: 60,
            worker_total_secs: 3_600,
            max_concurrent_llm_calls: 4,
            delete_merged_branches: true,
        }
    }
}

/// Memory subsystem settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Serialized briefing size ceiling in bytes
    pub briefing_byte_ceiling: usize,

    /// Prefetch total timeout
    pub prefetch_timeout_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            briefing_byte_ceiling: 2_048,
            prefetch_timeout_ms: 2_000,
        }
    }
}

/// Model provider settings (opaque to the core beyond this shape)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_base: None,
            api_key: None,
            request_timeout_secs: 60,
        }
    }
}

impl SunwellConfig {
    /// Load from a TOML file, falling back to defaults when absent, then
    /// apply the `AGENT_*` environment overlay.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)
                .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))?
        } else {
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply `AGENT_*` environment variables on top of file values
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("AGENT_BUDGET_TOTAL") {
            if let Ok(total) = v.parse() {
                self.budget.total_tokens = total;
            }
        }
        if let Ok(v) = std::env::var("AGENT_WORKERS") {
            if v == "auto" {
                self.coordinator.workers = std::thread::available_parallelism()
                    .map(|n| n.get().min(8))
                    .unwrap_or(2);
            } else if let Ok(n) = v.parse() {
                self.coordinator.workers = n;
            }
        }
        if let Ok(v) = std::env::var("AGENT_LOCK_TIMEOUT") {
            if let Ok(secs) = v.parse() {
                self.coordinator.lock_timeout_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("AGENT_MODEL_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("AGENT_MODEL_NAME") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("AGENT_MODEL_API_BASE") {
            self.llm.api_base = Some(v);
        }
        if let Ok(v) = std::env::var("AGENT_MODEL_API_KEY") {
            self.llm.api_key = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.budget.total_tokens == 0 {
            return Err(CoreError::Config("budget.total_tokens must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.budget.reserve_fraction) {
            return Err(CoreError::Config(
                "budget.reserve_fraction must be in [0, 1]".into(),
            ));
        }
        if self.executor.max_concurrent_tasks == 0 {
            return Err(CoreError::Config(
                "executor.max_concurrent_tasks must be > 0".into(),
            ));
        }
        if self.planner.agreement_clarify_threshold > self.planner.agreement_pick_threshold {
            return Err(CoreError::Config(
                "planner agreement thresholds are inverted".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        SunwellConfig::default().validate().unwrap();
    }

    #[test]
    fn test_defaults_match_spec() {
        let c = SunwellConfig::default();
        assert_eq!(c.executor.max_fix_attempts, 3);
        assert_eq!(c.executor.max_retries_per_task, 2);
        assert_eq!(c.executor.signal_timeout_secs, 10);
        assert_eq!(c.executor.task_timeout_secs, 60);
        assert_eq!(c.gates.timeout_secs, 30);
        assert_eq!(c.gates.readiness_initial_ms, 50);
        assert_eq!(c.gates.readiness_max_ms, 1_000);
        assert_eq!(c.coordinator.lock_timeout_secs, 30);
        assert_eq!(c.coordinator.stale_lock_secs, 60);
        assert_eq!(c.coordinator.heartbeat_interval_secs, 5);
        assert_eq!(c.coordinator.worker_stuck_secs, 60);
        assert_eq!(c.coordinator.worker_total_secs, 3_600);
        assert_eq!(c.memory.prefetch_timeout_ms, 2_000);
        assert_eq!(c.memory.briefing_byte_ceiling, 2_048);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let raw = r#"
            [budget]
            total_tokens = 5000

            [coordinator]
            workers = 3
        "#;
        let c: SunwellConfig = toml::from_str(raw).unwrap();
        assert_eq!(c.budget.total_tokens, 5_000);
        assert_eq!(c.coordinator.workers, 3);
        // Untouched sections keep defaults.
        assert_eq!(c.executor.max_fix_attempts, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut c = SunwellConfig::default();
        c.budget.total_tokens = 0;
        assert!(c.validate().is_err());

        let mut c = SunwellConfig::default();
        c.planner.agreement_clarify_threshold = 0.9;
        assert!(c.validate().is_err());
    }
}
