use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;
use crate::models::{self, DEFAULT_MODEL, Provider};

/// Default directory for the file-backed store.
const DEFAULT_DATA_DIR: &str = ".ideaforge/data";

/// Trailing delay for coalescing per-delta writes.
pub const DEFAULT_PERSIST_DEBOUNCE_MS: u64 = 400;

const CONFIG_ENV_VAR: &str = "IDEAFORGE_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "ideaforge.toml";

/// Per-provider API base URLs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Endpoints {
    pub openai: Option<String>,
    pub gemini: Option<String>,
    pub anthropic: Option<String>,
    pub mistral: Option<String>,
}

impl Endpoints {
    pub fn base_url(&self, provider: Provider) -> &str {
        let configured = match provider {
            Provider::OpenAi => self.openai.as_deref(),
            Provider::Gemini => self.gemini.as_deref(),
            Provider::Anthropic => self.anthropic.as_deref(),
            Provider::Mistral => self.mistral.as_deref(),
        };
        configured.unwrap_or_else(|| provider.default_base_url())
    }

    /// Point every provider at the same base URL (local mock servers).
    pub fn all(base_url: &str) -> Self {
        Self {
            openai: Some(base_url.to_string()),
            gemini: Some(base_url.to_string()),
            anthropic: Some(base_url.to_string()),
            mistral: Some(base_url.to_string()),
        }
    }
}

/// Shape of the optional TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    default_model: Option<String>,
    data_dir: Option<PathBuf>,
    persist_debounce_ms: Option<u64>,
    #[serde(default)]
    endpoints: Endpoints,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_keys: HashMap<Provider, String>,
    pub default_model: String,
    pub data_dir: PathBuf,
    pub persist_debounce: Duration,
    pub endpoints: Endpoints,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_keys: HashMap::new(),
            default_model: DEFAULT_MODEL.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            persist_debounce: Duration::from_millis(DEFAULT_PERSIST_DEBOUNCE_MS),
            endpoints: Endpoints::default(),
        }
    }
}

impl Config {
    /// Load from the environment plus the optional TOML file named by
    /// `IDEAFORGE_CONFIG` (falling back to `./ideaforge.toml` when present).
    pub fn load() -> Result<Self, AppError> {
        let path = env::var(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .ok()
            .or_else(|| {
                let p = PathBuf::from(DEFAULT_CONFIG_FILE);
                p.exists().then_some(p)
            });

        let file = match path {
            Some(p) => read_file_config(&p)?,
            None => FileConfig::default(),
        };

        let mut config = Self::from_file_config(file)?;
        config.api_keys = keys_from_env();
        Ok(config)
    }

    /// Parse a TOML document. API keys are not read from it.
    pub fn from_toml(text: &str) -> Result<Self, AppError> {
        let file: FileConfig =
            toml::from_str(text).map_err(|e| AppError::Config(format!("invalid config: {e}")))?;
        Self::from_file_config(file)
    }

    fn from_file_config(file: FileConfig) -> Result<Self, AppError> {
        let defaults = Self::default();
        let default_model = file.default_model.unwrap_or(defaults.default_model);
        // Fail early on a typo rather than at the first send.
        models::resolve(&default_model)?;

        Ok(Self {
            api_keys: HashMap::new(),
            default_model,
            data_dir: file.data_dir.unwrap_or(defaults.data_dir),
            persist_debounce: file
                .persist_debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.persist_debounce),
            endpoints: file.endpoints,
        })
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, AppError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&text).map_err(|e| AppError::Config(format!("invalid config: {e}")))
}

fn keys_from_env() -> HashMap<Provider, String> {
    let mut keys = HashMap::new();
    for provider in Provider::ALL {
        match env::var(provider.key_env_var()) {
            Ok(key) if !key.trim().is_empty() => {
                keys.insert(provider, key.trim().to_string());
            }
            _ => {
                tracing::warn!(
                    "{} not set, {provider} models unavailable",
                    provider.key_env_var()
                );
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.default_model, DEFAULT_MODEL);
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(
            config.persist_debounce,
            Duration::from_millis(DEFAULT_PERSIST_DEBOUNCE_MS)
        );
        assert_eq!(
            config.endpoints.base_url(Provider::Gemini),
            "https://generativelanguage.googleapis.com"
        );
    }

    #[test]
    fn toml_overrides_apply() {
        let config = Config::from_toml(
            r#"
default_model = "gpt-4.1"
data_dir = "/tmp/forge"
persist_debounce_ms = 50

[endpoints]
openai = "http://127.0.0.1:9999"
"#,
        )
        .unwrap();
        assert_eq!(config.default_model, "gpt-4.1");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/forge"));
        assert_eq!(config.persist_debounce, Duration::from_millis(50));
        assert_eq!(
            config.endpoints.base_url(Provider::OpenAi),
            "http://127.0.0.1:9999"
        );
        assert_eq!(
            config.endpoints.base_url(Provider::Mistral),
            "https://api.mistral.ai"
        );
    }

    #[test]
    fn unknown_default_model_is_rejected() {
        let err = Config::from_toml(r#"default_model = "gpt-9""#).unwrap_err();
        assert!(matches!(err, AppError::ModelNotFound { .. }));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_toml("api_key = \"oops\"").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
