//! Error types for core data model operations
//!
//! All errors implement `std::error::Error` via the `thiserror` crate.
//! Recoverable outcomes (downgrades, reclaimed locks, fix successes) are
//! ordinary return values elsewhere in the workspace; only structural and
//! fatal conditions surface here.

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors produced by the core data model
#[derive(Debug, Error)]
pub enum CoreError {
    /// Task graph structure is invalid (cycle, dangling reference, bad gate)
    #[error("graph validation failed: {0}")]
    Graph(String),

    /// An outbound event payload did not match its declared schema
    #[error("event schema violation for '{event_type}': {message}")]
    EventSchema {
        event_type: String,
        message: String,
    },

    /// Configuration is missing, malformed, or inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// A model capability call failed
    #[error("model error: {0}")]
    Model(String),

    /// The token budget cannot cover any further strategy, even SINGLE_SHOT
    #[error("budget exhausted: spent {spent} of {total} (reserve {reserve})")]
    BudgetExhausted { spent: u64, total: u64, reserve: u64 },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CoreError {
    /// True when the error maps to a terminal CLI outcome rather than a
    /// retryable condition.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::BudgetExhausted { .. } | CoreError::Config(_) | CoreError::Graph(_)
        )
    }
}
