//! Signal extraction
//!
//! One bounded model call turns (goal, lightweight project context) into a
//! [`SignalVector`]. Extraction is never fatal: parse failures and timeouts
//! fall back to the conservative defaults with `degraded = true`, and the
//! run proceeds.

use crate::error::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use sunwell_core::events::{EventEmitter, EventType};
use sunwell_core::model::{ChatMessage, CompletionRequest, Model};
use sunwell_core::signal::{SignalVector, Tri};
use tracing::warn;

/// Context items presented alongside the goal
pub const MAX_CONTEXT_ITEMS: usize = 3;

/// A lightweight piece of project context (readme excerpt, file list,
/// recent commit subjects)
#[derive(Debug, Clone)]
pub struct ContextItem {
    pub label: String,
    pub content: String,
}

impl ContextItem {
    pub fn new(label: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            content: content.into(),
        }
    }
}

/// Bounded-call signal extractor
pub struct SignalExtractor {
    model: Arc<dyn Model>,
    timeout: Duration,
}

impl SignalExtractor {
    pub fn new(model: Arc<dyn Model>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    /// Extract a signal vector; always succeeds, possibly degraded.
    pub async fn extract(
        &self,
        goal: &str,
        context: &[ContextItem],
        emitter: &EventEmitter,
    ) -> Result<SignalVector> {
        let _ = emitter.emit(EventType::SignalExtracting, json!({ "goal": goal }));

        let request = self.build_request(goal, context);
        let vector = match self.model.complete(&request, self.timeout).await {
            Ok(completion) => parse_signals(&completion.content),
            Err(e) => {
                warn!(error = %e, "signal extraction failed, using conservative defaults");
                let _ = emitter.emit(
                    EventType::Error,
                    json!({ "message": format!("signal extraction timeout: {}", e) }),
                );
                SignalVector::conservative_default()
            }
        };

        let vector = vector.normalized();
        let _ = emitter.emit(
            EventType::Signal,
            json!({
                "complexity": vector.complexity.as_str(),
                "confidence": vector.confidence,
                "needs_tools": vector.needs_tools.as_str(),
                "is_ambiguous": vector.is_ambiguous.as_str(),
                "is_dangerous": vector.is_dangerous.as_str(),
                "degraded": vector.degraded,
            }),
        );
        Ok(vector)
    }

    fn build_request(&self, goal: &str, context: &[ContextItem]) -> CompletionRequest {
        let mut prompt = format!(
            "Classify this goal. Reply with a JSON object only, with keys:\n\
             complexity (\"NO\"|\"MAYBE\"|\"YES\": needs multi-step decomposition),\n\
             needs_tools (\"NO\"|\"MAYBE\"|\"YES\"),\n\
             is_ambiguous (\"NO\"|\"MAYBE\"|\"YES\"),\n\
             is_dangerous (\"NO\"|\"MAYBE\"|\"YES\": destructive or irreversible),\n\
             confidence (number 0..1),\n\
             domain (short string),\n\
             toolchain_hint (string or null).\n\n\
             Goal: {}\n",
            goal
        );
        for item in context.iter().take(MAX_CONTEXT_ITEMS) {
            prompt.push_str(&format!("\n[{}]\n{}\n", item.label, item.content));
        }
        CompletionRequest::new(vec![
            ChatMessage::system("You classify software goals. JSON only."),
            ChatMessage::user(prompt),
        ])
        .with_json_mode()
        .with_max_tokens(256)
        .with_temperature(0.0)
    }
}

/// Parse a signal JSON object. Each missing or malformed field takes its
/// conservative default independently; only a completely unparseable body
/// degrades the whole vector.
fn parse_signals(content: &str) -> SignalVector {
    let value: Value = match serde_json::from_str(extract_json_object(content)) {
        Ok(value) => value,
        Err(_) => return SignalVector::conservative_default(),
    };
    let defaults = SignalVector::conservative_default();

    SignalVector {
        complexity: parse_tri(&value, "complexity").unwrap_or(defaults.complexity),
        needs_tools: parse_tri(&value, "needs_tools").unwrap_or(defaults.needs_tools),
        is_ambiguous: parse_tri(&value, "is_ambiguous").unwrap_or(defaults.is_ambiguous),
        is_dangerous: parse_tri(&value, "is_dangerous").unwrap_or(defaults.is_dangerous),
        confidence: value
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(defaults.confidence),
        domain: value
            .get("domain")
            .and_then(Value::as_str)
            .map(str::to_string),
        toolchain_hint: value
            .get("toolchain_hint")
            .and_then(Value::as_str)
            .map(str::to_string),
        degraded: false,
    }
}

fn parse_tri(value: &Value, key: &str) -> Option<Tri> {
    match value.get(key)?.as_str()? {
        "NO" => Some(Tri::No),
        "MAYBE" => Some(Tri::Maybe),
        "YES" => Some(Tri::Yes),
        _ => None,
    }
}

/// Trim prose around a JSON object (models occasionally wrap output in
/// markdown fences despite JSON mode)
fn extract_json_object(content: &str) -> &str {
    let start = content.find('{');
    let end = content.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if end > start => &content[start..=end],
        _ => content,
    }
}
