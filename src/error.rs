use thiserror::Error;

use crate::component::StructuralError;

/// Max bytes of an upstream error body echoed back in user-facing messages.
const USER_BODY_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or unreadable response body.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{provider} returned HTTP {status}: {body}")]
    Provider {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("structural error: {0}")]
    Structural(#[from] StructuralError),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("model not found: {model}")]
    ModelNotFound {
        model: String,
        suggestions: Vec<String>,
    },

    #[error("no API key configured for {provider}")]
    MissingCredentials { provider: String },

    #[error("a response is already streaming")]
    Busy,

    #[error("no active conversation")]
    NoActiveConversation,

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
}

impl AppError {
    /// Provider name for errors that carry one.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Provider { provider, .. } => Some(provider),
            Self::MissingCredentials { provider } => Some(provider),
            _ => None,
        }
    }

    /// HTTP status for upstream failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Provider { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Short human-readable form, used for the inline error note appended to
    /// the assistant message. Upstream bodies are cut to a short preview.
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider {
                provider,
                status,
                body,
            } => {
                let body = body.trim();
                if body.is_empty() {
                    format!("{provider} returned HTTP {status}")
                } else {
                    let preview: String = body.chars().take(USER_BODY_PREVIEW_CHARS).collect();
                    let suffix = if preview.len() < body.len() { "..." } else { "" };
                    format!("{provider} returned HTTP {status}: {preview}{suffix}")
                }
            }
            Self::ModelNotFound { model, suggestions } => {
                if suggestions.is_empty() {
                    format!("model not found: {model}")
                } else {
                    format!(
                        "model not found: {model}. Did you mean: {}?",
                        suggestions.join(", ")
                    )
                }
            }
            Self::MissingCredentials { provider } => {
                format!("add an API key for {provider} before sending")
            }
            Self::Request(_) => "request to provider failed".to_string(),
            Self::Serde(_) => "failed to serialize data".to_string(),
            other => other.to_string(),
        }
    }
}
