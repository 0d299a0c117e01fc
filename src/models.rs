use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// The closed set of upstream LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Gemini,
    Anthropic,
    Mistral,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::OpenAi,
        Provider::Gemini,
        Provider::Anthropic,
        Provider::Mistral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
            Provider::Anthropic => "anthropic",
            Provider::Mistral => "mistral",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn key_env_var(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Mistral => "MISTRAL_API_KEY",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com",
            Provider::Gemini => "https://generativelanguage.googleapis.com",
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::Mistral => "https://api.mistral.ai",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a selectable model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelConfig {
    /// Registry key shown to the user.
    pub id: &'static str,
    pub display_name: &'static str,
    pub provider: Provider,
    pub max_output_tokens: u32,
    /// Identifier sent to the provider API.
    pub model_id: &'static str,
    /// Reasoning effort for thinking models ("low", "medium", "high").
    pub reasoning_effort: Option<&'static str>,
}

pub const DEFAULT_MODEL: &str = "claude-sonnet-4";

static MODELS: &[ModelConfig] = &[
    ModelConfig {
        id: "gpt-5",
        display_name: "GPT-5",
        provider: Provider::OpenAi,
        max_output_tokens: 32_000,
        model_id: "gpt-5",
        reasoning_effort: Some("medium"),
    },
    ModelConfig {
        id: "gpt-4.1",
        display_name: "GPT-4.1",
        provider: Provider::OpenAi,
        max_output_tokens: 32_768,
        model_id: "gpt-4.1",
        reasoning_effort: None,
    },
    ModelConfig {
        id: "claude-sonnet-4",
        display_name: "Claude Sonnet 4",
        provider: Provider::Anthropic,
        max_output_tokens: 16_000,
        model_id: "claude-sonnet-4-20250514",
        reasoning_effort: None,
    },
    ModelConfig {
        id: "claude-opus-4",
        display_name: "Claude Opus 4",
        provider: Provider::Anthropic,
        max_output_tokens: 16_000,
        model_id: "claude-opus-4-20250514",
        reasoning_effort: None,
    },
    ModelConfig {
        id: "gemini-2.5-pro",
        display_name: "Gemini 2.5 Pro",
        provider: Provider::Gemini,
        max_output_tokens: 65_536,
        model_id: "gemini-2.5-pro",
        reasoning_effort: None,
    },
    ModelConfig {
        id: "gemini-2.5-flash",
        display_name: "Gemini 2.5 Flash",
        provider: Provider::Gemini,
        max_output_tokens: 65_536,
        model_id: "gemini-2.5-flash",
        reasoning_effort: None,
    },
    ModelConfig {
        id: "mistral-large",
        display_name: "Mistral Large",
        provider: Provider::Mistral,
        max_output_tokens: 8_192,
        model_id: "mistral-large-latest",
        reasoning_effort: None,
    },
    ModelConfig {
        id: "magistral-medium",
        display_name: "Magistral Medium",
        provider: Provider::Mistral,
        max_output_tokens: 40_000,
        model_id: "magistral-medium-latest",
        reasoning_effort: None,
    },
];

/// All registered models, in display order.
pub fn all() -> &'static [ModelConfig] {
    MODELS
}

pub fn get(id: &str) -> Option<&'static ModelConfig> {
    MODELS.iter().find(|m| m.id == id)
}

/// Look up a model, producing a `ModelNotFound` with suggestions on a miss.
pub fn resolve(id: &str) -> Result<&'static ModelConfig, AppError> {
    get(id).ok_or_else(|| AppError::ModelNotFound {
        model: id.to_string(),
        suggestions: suggest(id),
    })
}

/// Suggest similar model ids for a failed lookup (substring match).
/// Sorted alphabetically, capped at 5 to keep error messages readable.
pub fn suggest(query: &str) -> Vec<String> {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return vec![];
    }
    let mut suggestions: Vec<String> = MODELS
        .iter()
        .map(|m| m.id)
        .filter(|id| id.contains(&q) || q.contains(id))
        .map(str::to_string)
        .collect();
    suggestions.sort();
    suggestions.truncate(5);
    suggestions
}
