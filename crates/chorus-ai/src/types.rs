//! Models, providers and request options

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::structured::ResponseFormat;

/// OpenAI-compatible backends chorus knows how to reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Groq,
    OpenRouter,
    Ollama,
    /// Any other server; needs an explicit base URL
    Custom,
}

impl Provider {
    const ALL: [(Provider, &'static str); 4] = [
        (Provider::OpenAI, "openai"),
        (Provider::Groq, "groq"),
        (Provider::OpenRouter, "openrouter"),
        (Provider::Ollama, "ollama"),
    ];

    /// Unknown names map to `Custom`
    pub fn parse(s: &str) -> Self {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .find(|(_, key)| *key == lower)
            .map_or(Provider::Custom, |(provider, _)| *provider)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::Groq => "Groq",
            Provider::OpenRouter => "OpenRouter",
            Provider::Ollama => "Ollama",
            Provider::Custom => "Custom",
        }
    }

    /// Environment variable holding the API key; `None` for keyless servers
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::Groq => Some("GROQ_API_KEY"),
            Provider::OpenRouter => Some("OPENROUTER_API_KEY"),
            Provider::Ollama | Provider::Custom => None,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::Custom => "",
        }
    }
}

/// Dollars per million tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostInfo {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub provider: Provider,
    /// Chat completions root, without a trailing slash
    pub base_url: String,
    /// Accepts `reasoning_effort` and rejects `temperature`
    pub reasoning: bool,
    pub cost: CostInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u32,
    pub output: u32,
    pub cache_read: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input += other.input;
        self.output += other.output;
        self.cache_read += other.cache_read;
    }

    /// Estimated spend in dollars at the model's list price
    pub fn calculate_cost(&self, model: &Model) -> f64 {
        let per_token = |count: u32, price: f64| count as f64 * price / 1_000_000.0;
        per_token(self.input, model.cost.input)
            + per_token(self.output, model.cost.output)
            + per_token(self.cache_read, model.cost.cache_read)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    Length,
    ToolUse,
}

impl StopReason {
    /// Map an OpenAI `finish_reason`
    pub fn from_finish_reason(reason: &str) -> Option<Self> {
        match reason {
            "stop" => Some(StopReason::Stop),
            "length" => Some(StopReason::Length),
            "tool_calls" | "function_call" => Some(StopReason::ToolUse),
            _ => None,
        }
    }
}

/// A function the model may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub parameters: serde_json::Value,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Everything sent to the model for one completion
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub max_tokens: Option<u32>,
    /// Dropped for reasoning models
    pub temperature: Option<f32>,
    pub reasoning: Option<ReasoningLevel>,
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningLevel {
    #[default]
    Off,
    Low,
    Medium,
    High,
}

impl ReasoningLevel {
    /// Unknown names map to `Off`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => ReasoningLevel::Low,
            "medium" => ReasoningLevel::Medium,
            "high" => ReasoningLevel::High,
            _ => ReasoningLevel::Off,
        }
    }

    /// `reasoning_effort` request value
    pub fn as_effort(&self) -> Option<&'static str> {
        match self {
            ReasoningLevel::Off => None,
            ReasoningLevel::Low => Some("low"),
            ReasoningLevel::Medium => Some("medium"),
            ReasoningLevel::High => Some("high"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn priced_model() -> Model {
        Model {
            id: "m".into(),
            name: "m".into(),
            provider: Provider::OpenAI,
            base_url: String::new(),
            reasoning: false,
            cost: CostInfo {
                input: 1.0,
                output: 4.0,
                cache_read: 0.5,
            },
        }
    }

    #[test]
    fn test_usage_cost() {
        let mut usage = Usage {
            input: 1_000_000,
            ..Default::default()
        };
        usage.add(&Usage {
            output: 500_000,
            cache_read: 2_000_000,
            ..Default::default()
        });
        assert_eq!(usage.output, 500_000);
        assert!((usage.calculate_cost(&priced_model()) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_reasoning_level() {
        assert_eq!(ReasoningLevel::parse(" HIGH "), ReasoningLevel::High);
        assert_eq!(ReasoningLevel::parse("extreme"), ReasoningLevel::Off);
        assert_eq!(ReasoningLevel::Off.as_effort(), None);
        assert_eq!(ReasoningLevel::Medium.as_effort(), Some("medium"));
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(Provider::parse("OpenRouter"), Provider::OpenRouter);
        assert_eq!(Provider::parse("vllm"), Provider::Custom);
        assert_eq!(Provider::Ollama.api_key_env_var(), None);
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(StopReason::from_finish_reason("tool_calls"), Some(StopReason::ToolUse));
        assert_eq!(StopReason::from_finish_reason("content_filter"), None);
    }
}
