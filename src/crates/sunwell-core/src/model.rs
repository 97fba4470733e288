//! Model capability
//!
//! The LLM provider is an external collaborator; the core consumes it
//! through this trait only. Implementations live in `sunwell-llm`
//! (HTTP-backed client, scripted mock).

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature; candidate strategies vary this per sample
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Demand a single JSON object as output
    #[serde(default)]
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: 0.2,
            max_tokens: None,
            json_mode: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_json_mode(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A completed model response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

/// Incremental chunk of a streamed completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta: String,
    pub done: bool,
}

/// LLM provider capability: completion, JSON mode, streaming
#[async_trait]
pub trait Model: Send + Sync {
    /// Provider/model name for logging and accounting
    fn name(&self) -> &str;

    /// One bounded completion call
    async fn complete(&self, request: &CompletionRequest, timeout: Duration) -> Result<Completion>;

    /// Streamed completion; default adapters may fall back to `complete`
    async fn stream(
        &self,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        let completion = self.complete(request, timeout).await?;
        let chunk = StreamChunk {
            delta: completion.content,
            done: true,
        };
        Ok(Box::pin(futures::stream::once(async move { Ok(chunk) })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let req = CompletionRequest::new(vec![ChatMessage::user("hi")])
            .with_temperature(0.9)
            .with_json_mode()
            .with_max_tokens(256);
        assert!(req.json_mode);
        assert_eq!(req.temperature, 0.9);
        assert_eq!(req.max_tokens, Some(256));
    }

    #[test]
    fn test_usage_total() {
        let u = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
        };
        assert_eq!(u.total(), 150);
    }

    #[test]
    fn test_role_serde() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
    }
}
