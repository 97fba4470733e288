//! # sunwell-llm
//!
//! Model capability implementations. The core consumes providers through
//! the [`sunwell_core::model::Model`] trait; this crate supplies the
//! OpenAI-compatible HTTP client used in production and the scripted
//! [`MockModel`] used throughout the test suites.

pub mod client;
pub mod error;
pub mod mock;

pub use client::HttpModel;
pub use error::{LlmError, Result};
pub use mock::MockModel;

use std::sync::Arc;
use sunwell_core::config::LlmConfig;
use sunwell_core::model::Model;

/// Build the configured provider as a shared [`Model`] handle
pub fn from_config(config: &LlmConfig) -> Result<Arc<dyn Model>> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockModel::new())),
        // Every HTTP provider speaks the same dialect; the base URL selects it.
        _ => Ok(Arc::new(HttpModel::from_config(config)?)),
    }
}
