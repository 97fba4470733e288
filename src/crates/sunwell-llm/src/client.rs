//! OpenAI-compatible chat client
//!
//! One HTTP client covers every provider speaking the `/chat/completions`
//! dialect (OpenAI, Deepseek, Grok, OpenRouter, local gateways). The
//! provider is opaque to the core: base URL + key + model name come from
//! configuration.

use crate::error::{LlmError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use sunwell_core::config::LlmConfig;
use sunwell_core::model::{Completion, CompletionRequest, Model, Role, TokenUsage};
use tracing::{debug, warn};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// HTTP-backed chat model
#[derive(Clone)]
pub struct HttpModel {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
}

impl std::fmt::Debug for HttpModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpModel")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl HttpModel {
    /// Build a client from provider configuration
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Config(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    fn wire_messages(request: &CompletionRequest) -> Vec<WireMessage> {
        request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    Role::System => "system".to_string(),
                    Role::User => "user".to_string(),
                    Role::Assistant => "assistant".to_string(),
                },
                content: m.content.clone(),
            })
            .collect()
    }

    async fn send(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = WireRequest {
            model: &self.model,
            messages: Self::wire_messages(request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "provider returned error status");
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let wire: WireResponse = response.json().await?;
        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Malformed("empty choices".to_string()))?;
        let usage = wire
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        debug!(
            model = %self.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "completion received"
        );

        Ok(Completion {
            content: choice.message.content,
            usage,
        })
    }
}

#[async_trait]
impl Model for HttpModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> sunwell_core::Result<Completion> {
        let result = tokio::time::timeout(timeout, self.send(request)).await;
        match result {
            Ok(inner) => inner.map_err(Into::into),
            Err(_) => Err(LlmError::Timeout(timeout).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sunwell_core::model::ChatMessage as Msg;

    #[test]
    fn test_wire_messages_roles() {
        let request = CompletionRequest::new(vec![
            Msg::system("rules"),
            Msg::user("hello"),
            Msg::assistant("hi"),
        ]);
        let wire = HttpModel::wire_messages(&request);
        let roles: Vec<&str> = wire.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
    }

    #[test]
    fn test_from_config_defaults_base() {
        let config = LlmConfig::default();
        let model = HttpModel::from_config(&config).unwrap();
        assert_eq!(model.api_base, DEFAULT_API_BASE);
    }
}
