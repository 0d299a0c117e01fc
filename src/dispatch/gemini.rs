use serde::Deserialize;
use serde_json::{Value, json};

use crate::dispatch::{EventParse, HttpRequestSpec, ProviderAdapter, StreamRequest, sendable};
use crate::models::Provider;
use crate::state::Role;

pub struct GeminiAdapter {
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
    /// Thought summaries are not part of the answer.
    #[serde(default)]
    thought: bool,
}

impl ProviderAdapter for GeminiAdapter {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn build_request(&self, req: &StreamRequest<'_>) -> HttpRequestSpec {
        let mut instruction = req.system_prompt.to_string();
        let mut contents: Vec<Value> = Vec::new();
        for m in sendable(req.messages) {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "model",
                Role::System => {
                    if !instruction.is_empty() {
                        instruction.push_str("\n\n");
                    }
                    instruction.push_str(&m.content);
                    continue;
                }
            };
            contents.push(json!({"role": role, "parts": [{"text": m.content}]}));
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": {"maxOutputTokens": req.model.max_output_tokens},
        });
        if !instruction.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": instruction}]});
        }

        HttpRequestSpec {
            url: format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                self.base_url, req.model.model_id
            ),
            headers: vec![
                ("x-goog-api-key".to_string(), req.api_key.to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
            ],
            body,
        }
    }

    fn parse_event(&self, payload: &str) -> EventParse {
        let chunk: GenerateChunk = match serde_json::from_str(payload) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!("skipping unparseable gemini chunk: {e}");
                return EventParse::skip();
            }
        };

        let Some(candidate) = chunk.candidates.into_iter().next() else {
            return EventParse::skip();
        };

        let text: String = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| !p.thought)
            .filter_map(|p| p.text)
            .collect();

        EventParse {
            delta: (!text.is_empty()).then_some(text),
            // The last chunk carries a finish reason, usually alongside text.
            done: candidate.finish_reason.is_some(),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models;
    use crate::state::ChatMessage;

    fn adapter() -> GeminiAdapter {
        GeminiAdapter::new("https://generativelanguage.googleapis.com".to_string())
    }

    #[test]
    fn request_renames_assistant_to_model() {
        let messages = vec![
            ChatMessage::new(Role::User, "idea"),
            ChatMessage::new(Role::Assistant, "nice"),
            ChatMessage::new(Role::User, "go on"),
            ChatMessage::new(Role::Assistant, ""),
        ];
        let req = StreamRequest {
            messages: &messages,
            api_key: "gk",
            model: models::get("gemini-2.5-pro").unwrap(),
            system_prompt: "persona",
        };
        let spec = adapter().build_request(&req);

        assert_eq!(
            spec.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:streamGenerateContent?alt=sse"
        );
        assert!(spec.headers.contains(&("x-goog-api-key".to_string(), "gk".to_string())));
        let contents = spec.body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "nice");
        assert_eq!(spec.body["systemInstruction"]["parts"][0]["text"], "persona");
        assert_eq!(spec.body["generationConfig"]["maxOutputTokens"], 65_536);
    }

    #[test]
    fn concatenates_text_parts_and_skips_thoughts() {
        let p = adapter().parse_event(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"plan","thought":true},{"text":"Hello "},{"text":"there"}]}}]}"#,
        );
        assert_eq!(p, EventParse::delta("Hello there"));
    }

    #[test]
    fn finish_reason_ends_stream_after_text() {
        let p = adapter().parse_event(
            r#"{"candidates":[{"content":{"parts":[{"text":"end."}]},"finishReason":"STOP"}]}"#,
        );
        assert_eq!(p.delta.as_deref(), Some("end."));
        assert!(p.done);
    }

    #[test]
    fn usage_only_chunk_is_skipped() {
        let p = adapter().parse_event(r#"{"usageMetadata":{"totalTokenCount":3}}"#);
        assert_eq!(p, EventParse::skip());
    }
}
