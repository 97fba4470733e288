//! Error types for the execution engine
//!
//! Terminal routing outcomes (HALT, CLARIFY) and contained recoveries
//! (fix succeeded, strategy downgraded) are ordinary returns, not errors.
//! The variants here are the conditions that end or suspend a run; the CLI
//! maps them onto exit codes.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that bubble out of planning and execution
#[derive(Debug, Error)]
pub enum EngineError {
    /// No plan converged; carries the reason and the best rejected candidate
    #[error("plan aborted: {reason}")]
    PlanAbort {
        reason: String,
        best_candidate: Option<String>,
    },

    /// Fix attempts exhausted at a gate; the stream pauses for user input
    #[error("escalation at gate '{gate_id}': {reason}")]
    Escalation { gate_id: String, reason: String },

    /// A task failed after all retries
    #[error("task '{task_id}' failed: {message}")]
    Task { task_id: String, message: String },

    /// Toolchain command missing or unrunnable
    #[error("toolchain error: {0}")]
    Toolchain(String),

    /// Budget cannot cover even the floor strategy
    #[error("budget exhausted: {0}")]
    BudgetExhausted(String),

    #[error(transparent)]
    Core(#[from] sunwell_core::CoreError),

    #[error(transparent)]
    Memory(#[from] sunwell_memory::MemoryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
