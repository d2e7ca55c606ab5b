//! Configuration loader for owlflow.
//!
//! Reads `config.toml` from the data directory (`~/.owlflow/` by default) or
//! an explicit path, and deserializes it into [`OwlflowConfig`]. Falls back to
//! defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use owlflow_types::config::OwlflowConfig;

/// Environment variable overriding the data directory.
pub const ENV_DATA_DIR: &str = "OWLFLOW_DATA_DIR";

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `OWLFLOW_DATA_DIR` environment variable
/// 2. `~/.owlflow`
/// 3. `.owlflow` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
        return PathBuf::from(dir);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".owlflow");
    }
    PathBuf::from(".owlflow")
}

/// The config file to read: the explicit path if given, else `{data_dir}/config.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => resolve_data_dir().join("config.toml"),
    }
}

/// Load configuration from `path`.
///
/// - Missing file: defaults.
/// - Unreadable or unparsable file: logs a warning, defaults.
pub async fn load_config(path: &Path) -> OwlflowConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return OwlflowConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return OwlflowConfig::default();
        }
    };

    match OwlflowConfig::from_toml_str(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            OwlflowConfig::default()
        }
    }
}

/// Load from the resolved path, then apply `OLLAMA_*` environment overrides.
pub async fn load_effective_config(explicit: Option<&Path>) -> OwlflowConfig {
    let path = resolve_config_path(explicit);
    let mut config = load_config(&path).await;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("config.toml")).await;
        assert_eq!(config, OwlflowConfig::default());
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        tokio::fs::write(
            &path,
            r#"
[engine]
event_capacity = 64

[ollama]
base_url = "http://gpu-box:11434"

[http]
timeout_secs = 5
"#,
        )
        .await
        .unwrap();

        let config = load_config(&path).await;
        assert_eq!(config.engine.event_capacity, 64);
        assert_eq!(config.engine.default_step_timeout_ms, 60_000);
        assert_eq!(config.ollama.base_url, "http://gpu-box:11434");
        assert_eq!(config.ollama.model, "llama3.2");
        assert_eq!(config.http.timeout_secs, 5);
    }

    #[tokio::test]
    async fn load_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        tokio::fs::write(&path, "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config(&path).await;
        assert_eq!(config, OwlflowConfig::default());
    }

    #[test]
    fn resolve_config_path_prefers_explicit() {
        let explicit = Path::new("/etc/owlflow/custom.toml");
        assert_eq!(resolve_config_path(Some(explicit)), explicit);
        assert!(resolve_config_path(None).ends_with("config.toml"));
    }
}
