pub mod anthropic;
pub mod gemini;
pub mod http;
pub mod mistral;
pub mod openai;

use serde_json::Value;

use crate::config::Endpoints;
use crate::error::AppError;
use crate::models::{ModelConfig, Provider};
use crate::state::ChatMessage;

/// Provider-agnostic input to one streaming request.
pub struct StreamRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub api_key: &'a str,
    pub model: &'a ModelConfig,
    pub system_prompt: &'a str,
}

/// A fully built HTTP request. Owned, so the conversation it was built from
/// can be mutated while the response streams in.
#[derive(Debug, Clone)]
pub struct HttpRequestSpec {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

/// What one SSE payload means to a provider.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EventParse {
    pub delta: Option<String>,
    /// The provider signalled the end of the stream.
    pub done: bool,
    /// The provider reported a failure inside the stream.
    pub error: Option<String>,
}

impl EventParse {
    pub fn skip() -> Self {
        Self::default()
    }

    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }
}

/// How a stream ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Finished,
    /// Stopped by the user. Not an error.
    Cancelled,
}

/// Receives streaming callbacks. Exactly one of `on_complete` / `on_error`
/// is called per stream.
pub trait StreamSink {
    fn on_delta(&mut self, text: &str);
    fn on_complete(&mut self, completion: Completion);
    fn on_error(&mut self, error: &AppError);
}

/// Per-provider request building and envelope parsing.
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    fn build_request(&self, req: &StreamRequest<'_>) -> HttpRequestSpec;

    /// Map one SSE payload. Must not fail: unparseable payloads are skipped.
    fn parse_event(&self, payload: &str) -> EventParse;
}

/// Resolve the adapter for a provider against the configured endpoints.
pub fn adapter_for(provider: Provider, endpoints: &Endpoints) -> Box<dyn ProviderAdapter> {
    let base_url = endpoints.base_url(provider).trim_end_matches('/').to_string();
    match provider {
        Provider::OpenAi => Box::new(openai::OpenAiAdapter::new(base_url)),
        Provider::Gemini => Box::new(gemini::GeminiAdapter::new(base_url)),
        Provider::Anthropic => Box::new(anthropic::AnthropicAdapter::new(base_url)),
        Provider::Mistral => Box::new(mistral::MistralAdapter::new(base_url)),
    }
}

/// Messages worth sending upstream: empty placeholders are dropped.
pub(crate) fn sendable(messages: &[ChatMessage]) -> impl Iterator<Item = &ChatMessage> {
    messages.iter().filter(|m| !m.content.trim().is_empty())
}
