//! Error types for the memory subsystem

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MemoryError>;

/// Errors from learning store, briefing, and prefetch operations
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("briefing exceeds byte ceiling even after truncation: {size} > {ceiling}")]
    BriefingOverflow { size: usize, ceiling: usize },

    #[error(transparent)]
    Core(#[from] sunwell_core::CoreError),
}
