//! Configuration file support

use std::fs;
use std::path::{Path, PathBuf};

use chorus_agent::OutputMode;
use chorus_ai::Provider;
use serde::{Deserialize, Serialize};

/// Configuration for chorus
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model to use
    pub model: Option<String>,
    /// Default provider (openai, groq, openrouter, ollama)
    pub provider: Option<String>,
    /// Override the provider's API base URL
    pub base_url: Option<String>,
    /// Default reasoning level
    pub reasoning_level: Option<String>,
    /// Catalog location (`.sql` script or SQLite database)
    pub database: Option<String>,
    /// How sub-agent output is merged back into the conversation
    pub output_mode: Option<OutputMode>,
    /// Model calls allowed per customer turn
    pub recursion_limit: Option<u32>,
    /// Retries for transient provider errors
    pub max_retries: Option<u32>,
    /// Where conversation threads are saved
    pub threads_dir: Option<String>,
    /// Where long-term customer memory is saved
    pub memory_file: Option<String>,
    /// API keys (alternative to environment variables)
    #[serde(default)]
    pub api_keys: ApiKeys,
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub groq: Option<String>,
    pub openrouter: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chorus")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("CHORUS_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`; a missing file means defaults, a broken one
    /// is reported and ignored
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        let parsed: Result<Self, String> = fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))
            .and_then(|content| {
                toml::from_str(&content).map_err(|e| format!("cannot parse {}: {}", path.display(), e))
            });
        parsed.unwrap_or_else(|message| {
            tracing::warn!("Ignoring config file: {}", message);
            eprintln!("Warning: ignoring config file ({message})");
            Self::default()
        })
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            model: Some(chorus_ai::models::DEFAULT_MODEL_ID.to_string()),
            provider: Some("openai".to_string()),
            reasoning_level: Some("off".to_string()),
            output_mode: Some(OutputMode::default()),
            recursion_limit: Some(chorus_agent::graph::DEFAULT_RECURSION_LIMIT),
            ..Default::default()
        };

        default_config.save_to(&path)?;
        Ok(path)
    }

    /// API key for a provider: the config file wins over the environment
    pub fn get_api_key(&self, provider: &str) -> Option<String> {
        let provider = Provider::parse(provider);
        let configured = match provider {
            Provider::OpenAI => self.api_keys.openai.clone(),
            Provider::Groq => self.api_keys.groq.clone(),
            Provider::OpenRouter => self.api_keys.openrouter.clone(),
            Provider::Ollama | Provider::Custom => None,
        };
        configured.or_else(|| std::env::var(provider.api_key_env_var()?).ok())
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# chorus configuration file
# Place at ~/.config/chorus/config.toml (Linux) or set CHORUS_CONFIG_PATH

# Default model to use
model = "o3-mini"

# Provider (openai, groq, openrouter, ollama)
provider = "openai"

# Custom endpoint for an OpenAI-compatible server (optional)
# base_url = "http://localhost:8080/v1"

# Reasoning level (off, low, medium, high)
reasoning_level = "off"

# Catalog: Chinook `.sql` script or SQLite database (optional)
# Defaults to the script downloaded by `chorus --fetch-catalog`
# database = "~/.local/share/chorus/Chinook_Sqlite.sql"

# Sub-agent output merged into the conversation: full_history or last_message
output_mode = "full_history"

# Model calls allowed per customer turn
recursion_limit = 25

# Retries for rate limits and transient provider errors
# max_retries = 3

# Storage for saved conversations and customer memory (optional)
# threads_dir = "~/.local/share/chorus/threads"
# memory_file = "~/.local/share/chorus/memory.json"

# API keys (optional - can also use environment variables)
[api_keys]
# openai = "sk-..."
# groq = "gsk_..."
# openrouter = "sk-or-..."
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.model.as_deref(), Some("o3-mini"));
        assert_eq!(config.output_mode, Some(OutputMode::FullHistory));
        assert_eq!(config.recursion_limit, Some(25));
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            provider: Some("groq".to_string()),
            output_mode: Some(OutputMode::LastMessage),
            api_keys: ApiKeys {
                groq: Some("gsk-test".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path);
        assert_eq!(loaded.provider.as_deref(), Some("groq"));
        assert_eq!(loaded.output_mode, Some(OutputMode::LastMessage));
        assert_eq!(loaded.get_api_key("groq").as_deref(), Some("gsk-test"));
    }

    #[test]
    fn test_broken_or_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Config::load_from(&dir.path().join("none.toml"));
        assert!(missing.model.is_none());

        let path = dir.path().join("bad.toml");
        fs::write(&path, "model = [unterminated").unwrap();
        assert!(Config::load_from(&path).model.is_none());
    }

    #[test]
    fn test_keyless_provider_has_no_key() {
        assert!(Config::default().get_api_key("ollama").is_none());
    }
}
