use serde_json::{Value, json};

use crate::dispatch::openai::content_text;
use crate::dispatch::{EventParse, HttpRequestSpec, ProviderAdapter, StreamRequest, sendable};
use crate::models::Provider;
use crate::state::Role;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn build_request(&self, req: &StreamRequest<'_>) -> HttpRequestSpec {
        // The Messages API has no system role: system-role history is folded
        // into the top-level `system` field after the prompt.
        let mut system = req.system_prompt.to_string();
        let mut messages = Vec::new();
        for m in sendable(req.messages) {
            match m.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push_str("\n\n");
                    }
                    system.push_str(&m.content);
                }
                Role::User => messages.push(json!({"role": "user", "content": m.content})),
                Role::Assistant => {
                    messages.push(json!({"role": "assistant", "content": m.content}))
                }
            }
        }

        let mut body = json!({
            "model": req.model.model_id,
            "max_tokens": req.model.max_output_tokens,
            "messages": messages,
            "stream": true,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }

        HttpRequestSpec {
            url: format!("{}/v1/messages", self.base_url),
            headers: vec![
                ("x-api-key".to_string(), req.api_key.to_string()),
                ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
            ],
            body,
        }
    }

    fn parse_event(&self, payload: &str) -> EventParse {
        let v: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("skipping unparseable anthropic event: {e}");
                return EventParse::skip();
            }
        };

        match v["type"].as_str() {
            Some("content_block_delta") => {
                if v["delta"]["type"].as_str() == Some("text_delta")
                    && let Some(text) = v["delta"]["text"].as_str()
                    && !text.is_empty()
                {
                    EventParse::delta(text)
                } else {
                    EventParse::skip()
                }
            }
            Some("message_stop") => EventParse::done(),
            Some("error") => {
                let message = v["error"]["message"]
                    .as_str()
                    .or_else(|| v["error"]["type"].as_str())
                    .unwrap_or("unknown stream error");
                EventParse {
                    error: Some(message.to_string()),
                    ..EventParse::default()
                }
            }
            // Non-incremental fallback: a complete message object.
            Some("message") => match content_text(&v["content"]) {
                Some(text) if !text.is_empty() => EventParse {
                    delta: Some(text),
                    done: true,
                    error: None,
                },
                _ => EventParse::done(),
            },
            _ => EventParse::skip(),
        }
    }
}
