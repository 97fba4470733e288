//! Error types for model provider implementations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors from provider clients
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport-level failure
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Provider returned a non-success status
    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },

    /// Provider response did not have the expected shape
    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// The call exceeded its deadline
    #[error("model call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Client misconfiguration (missing key, bad base URL)
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<LlmError> for sunwell_core::CoreError {
    fn from(err: LlmError) -> Self {
        sunwell_core::CoreError::Model(err.to_string())
    }
}
