use serde_json::json;

use crate::dispatch::openai::{chat_messages, parse_chat_chunk};
use crate::dispatch::{EventParse, HttpRequestSpec, ProviderAdapter, StreamRequest};
use crate::models::Provider;

/// Mistral speaks the chat-completions envelope. Reasoning models stream
/// typed chunks (`thinking` alongside `text`), which `parse_chat_chunk`
/// already filters down to text.
pub struct MistralAdapter {
    base_url: String,
}

impl MistralAdapter {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

impl ProviderAdapter for MistralAdapter {
    fn provider(&self) -> Provider {
        Provider::Mistral
    }

    fn build_request(&self, req: &StreamRequest<'_>) -> HttpRequestSpec {
        let body = json!({
            "model": req.model.model_id,
            "messages": chat_messages(req),
            "stream": true,
            "max_tokens": req.model.max_output_tokens,
        });

        HttpRequestSpec {
            url: format!("{}/v1/chat/completions", self.base_url),
            headers: vec![
                ("Authorization".to_string(), format!("Bearer {}", req.api_key)),
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Accept".to_string(), "text/event-stream".to_string()),
            ],
            body,
        }
    }

    fn parse_event(&self, payload: &str) -> EventParse {
        parse_chat_chunk(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models;
    use crate::state::{ChatMessage, Role};

    #[test]
    fn request_uses_max_tokens() {
        let messages = vec![ChatMessage::new(Role::User, "hi")];
        let req = StreamRequest {
            messages: &messages,
            api_key: "k",
            model: models::get("mistral-large").unwrap(),
            system_prompt: "sys",
        };
        let spec = MistralAdapter::new("https://api.mistral.ai".into()).build_request(&req);
        assert_eq!(spec.url, "https://api.mistral.ai/v1/chat/completions");
        assert_eq!(spec.body["max_tokens"], 8_192);
        assert_eq!(spec.body["model"], "mistral-large-latest");
        assert!(spec.body.get("max_completion_tokens").is_none());
    }

    #[test]
    fn thinking_chunks_are_dropped() {
        let adapter = MistralAdapter::new(String::new());
        let p = adapter.parse_event(
            r#"{"choices":[{"delta":{"content":[{"type":"thinking","thinking":[{"type":"text","text":"hmm"}]},{"type":"text","text":"Answer"}]}}]}"#,
        );
        assert_eq!(p, EventParse::delta("Answer"));
    }
}
