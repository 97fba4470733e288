//! Scripted mock model for tests
//!
//! Responses are queued up front and dequeued per call; every request is
//! journaled so tests can assert on prompts. When the queue runs dry the
//! mock returns its fallback response, so unbounded loops still terminate.

use parking_lot::Mutex;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use sunwell_core::model::{Completion, CompletionRequest, Model, TokenUsage};

/// Queue-scripted [`Model`] implementation
pub struct MockModel {
    responses: Mutex<VecDeque<Completion>>,
    calls: Mutex<Vec<CompletionRequest>>,
    fallback: String,
}

impl std::fmt::Debug for MockModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockModel")
            .field("queued", &self.responses.lock().len())
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockModel {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            fallback: "{}".to_string(),
        }
    }

    /// Queue a response with a nominal token usage
    pub fn push_response(&self, content: impl Into<String>) {
        self.responses.lock().push_back(Completion {
            content: content.into(),
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
            },
        });
    }

    /// Queue a response with explicit usage, for budget accounting tests
    pub fn push_response_with_usage(&self, content: impl Into<String>, usage: TokenUsage) {
        self.responses.lock().push_back(Completion {
            content: content.into(),
            usage,
        });
    }

    /// Content returned once the queue is empty
    pub fn with_fallback(mut self, content: impl Into<String>) -> Self {
        self.fallback = content.into();
        self
    }

    /// All requests seen so far, in call order
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Model for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        _timeout: Duration,
    ) -> sunwell_core::Result<Completion> {
        self.calls.lock().push(request.clone());
        let response = self.responses.lock().pop_front().unwrap_or(Completion {
            content: self.fallback.clone(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
        });
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sunwell_core::model::ChatMessage;

    #[tokio::test]
    async fn test_mock_dequeues_in_order() {
        let mock = MockModel::new();
        mock.push_response("first");
        mock.push_response("second");

        let req = CompletionRequest::new(vec![ChatMessage::user("x")]);
        let a = mock.complete(&req, Duration::from_secs(1)).await.unwrap();
        let b = mock.complete(&req, Duration::from_secs(1)).await.unwrap();
        assert_eq!(a.content, "first");
        assert_eq!(b.content, "second");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_fallback() {
        let mock = MockModel::new().with_fallback("done");
        let req = CompletionRequest::new(vec![ChatMessage::user("x")]);
        let c = mock.complete(&req, Duration::from_secs(1)).await.unwrap();
        assert_eq!(c.content, "done");
    }
}
