use serde::Deserialize;
use serde_json::{Value, json};

use crate::dispatch::{EventParse, HttpRequestSpec, ProviderAdapter, StreamRequest, sendable};
use crate::models::Provider;
use crate::state::Role;

/// Sentinel payload closing an OpenAI-compatible stream.
pub const DONE_SENTINEL: &str = "[DONE]";

pub struct OpenAiAdapter {
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    delta: Option<Message>,
    /// Some compatible servers send whole messages instead of deltas.
    message: Option<Message>,
}

#[derive(Deserialize)]
struct Message {
    content: Option<Value>,
}

/// Chat-completions message list with the system prompt inlined first.
pub(crate) fn chat_messages(req: &StreamRequest<'_>) -> Vec<Value> {
    let mut messages = Vec::new();
    if !req.system_prompt.is_empty() {
        messages.push(json!({"role": "system", "content": req.system_prompt}));
    }
    for m in sendable(req.messages) {
        let role = match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        messages.push(json!({"role": role, "content": m.content}));
    }
    messages
}

/// Parse one chat-completions chunk. Shared by every provider speaking the
/// OpenAI envelope.
pub(crate) fn parse_chat_chunk(payload: &str) -> EventParse {
    if payload.trim() == DONE_SENTINEL {
        return EventParse::done();
    }

    let chunk: ChatChunk = match serde_json::from_str(payload) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!("skipping unparseable chat chunk: {e}");
            return EventParse::skip();
        }
    };

    let Some(choice) = chunk.choices.into_iter().next() else {
        return EventParse::skip();
    };

    let content = choice
        .delta
        .and_then(|d| d.content)
        .or_else(|| choice.message.and_then(|m| m.content));

    match content.as_ref().and_then(content_text) {
        Some(text) if !text.is_empty() => EventParse::delta(text),
        _ => EventParse::skip(),
    }
}

/// Plain string content, or an array of typed parts where only text parts
/// count.
pub(crate) fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let text: String = parts
                .iter()
                .filter(|p| p["type"].as_str() == Some("text"))
                .filter_map(|p| p["text"].as_str())
                .collect();
            Some(text)
        }
        _ => None,
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn build_request(&self, req: &StreamRequest<'_>) -> HttpRequestSpec {
        let mut body = json!({
            "model": req.model.model_id,
            "messages": chat_messages(req),
            "stream": true,
            "max_completion_tokens": req.model.max_output_tokens,
        });
        if let Some(effort) = req.model.reasoning_effort {
            body["reasoning_effort"] = json!(effort);
        }

        HttpRequestSpec {
            url: format!("{}/v1/chat/completions", self.base_url),
            headers: vec![
                ("Authorization".to_string(), format!("Bearer {}", req.api_key)),
                ("Content-Type".to_string(), "application/json".to_string()),
            ],
            body,
        }
    }

    fn parse_event(&self, payload: &str) -> EventParse {
        parse_chat_chunk(payload)
    }
}
