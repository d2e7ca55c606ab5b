//! Global configuration types for owlflow.
//!
//! `OwlflowConfig` represents the top-level `config.toml` that controls engine
//! defaults, the text-generation backend, and the outbound HTTP client.

use serde::{Deserialize, Serialize};

/// Environment variable overriding [`OllamaSettings::base_url`].
pub const ENV_OLLAMA_BASE_URL: &str = "OLLAMA_BASE_URL";
/// Environment variable overriding [`OllamaSettings::model`].
pub const ENV_OLLAMA_MODEL: &str = "OLLAMA_MODEL";

/// Top-level configuration.
///
/// Loaded from `~/.owlflow/config.toml` or an explicit `--config` path. All
/// fields have sensible defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwlflowConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub ollama: OllamaSettings,
    #[serde(default)]
    pub http: HttpSettings,
}

impl OwlflowConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Apply `OLLAMA_BASE_URL` / `OLLAMA_MODEL` style overrides.
    ///
    /// `lookup` abstracts the environment so tests don't touch process state.
    /// Blank values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_blank(ENV_OLLAMA_BASE_URL) {
            self.ollama.base_url = url;
        }
        if let Some(model) = non_blank(ENV_OLLAMA_MODEL) {
            self.ollama.model = model;
        }
    }
}

/// Engine defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Per-attempt timeout for steps that don't declare one.
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,
    /// Capacity of the execution event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_step_timeout_ms() -> u64 {
    60_000
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: default_step_timeout_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Local Ollama backend used for AI decision steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaSettings {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
    #[serde(default = "default_ollama_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.2".to_string()
}

fn default_ollama_timeout_secs() -> u64 {
    120
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
            timeout_secs: default_ollama_timeout_secs(),
        }
    }
}

/// Outbound HTTP client used by HTTP request steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("owlflow/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}
