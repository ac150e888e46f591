//! Environment configuration

use std::net::SocketAddr;

use thiserror::Error;

pub const DEFAULT_FILE_PATH: &str = "cicd/prompt_manifest.json";
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_LANGSMITH_ENDPOINT: &str = "https://api.smith.langchain.com";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid listen address '{0}'")]
    InvalidAddr(String),
}

/// Where the webhook commits prompt manifests
#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub token: String,
    pub owner: String,
    pub repo: String,
    pub file_path: String,
    pub branch: String,
    pub api_url: String,
}

impl GithubConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as missing
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        Ok(Self {
            token: require("GITHUB_TOKEN")?,
            owner: require("GITHUB_REPO_OWNER")?,
            repo: require("GITHUB_REPO_NAME")?,
            file_path: get("GITHUB_FILE_PATH").unwrap_or_else(|| DEFAULT_FILE_PATH.to_string()),
            branch: get("GITHUB_BRANCH").unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            api_url: get("GITHUB_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
        })
    }

    /// Contents API URL of the manifest file
    pub fn contents_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_url, self.owner, self.repo, self.file_path
        )
    }
}

/// Listen address for `serve`
pub fn listen_addr(value: Option<String>) -> Result<SocketAddr, ConfigError> {
    let value = value.unwrap_or_else(|| DEFAULT_ADDR.to_string());
    value.parse().map_err(|_| ConfigError::InvalidAddr(value))
}

/// Credentials for the evaluation API
#[derive(Debug, Clone)]
pub struct LangSmithConfig {
    pub api_key: String,
    pub endpoint: String,
}

impl LangSmithConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("LANGSMITH_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("LANGSMITH_API_KEY"))?;
        let endpoint = lookup("LANGSMITH_ENDPOINT")
            .filter(|v| !v.trim().is_empty())
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_LANGSMITH_ENDPOINT.to_string());
        Ok(Self { api_key, endpoint })
    }
}

/// API key for the models an evaluation drives
pub fn openai_api_key(lookup: impl Fn(&str) -> Option<String>) -> Result<String, ConfigError> {
    lookup("OPENAI_API_KEY")
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing("OPENAI_API_KEY"))
}
