//! Structured (JSON schema constrained) output

use serde::de::DeserializeOwned;

use crate::{Error, Message, Result};

/// A JSON schema the response must conform to
#[derive(Debug, Clone)]
pub struct ResponseFormat {
    /// Schema name sent to the provider
    pub name: String,
    /// JSON Schema of the expected object
    pub schema: serde_json::Value,
}

impl ResponseFormat {
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Request body fragment for the `response_format` field
    pub fn to_request_value(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "json_schema",
            "json_schema": {
                "name": self.name,
                "strict": true,
                "schema": self.schema,
            }
        })
    }
}

/// Parse the text of an assistant message as `T`.
///
/// Tolerates a surrounding markdown code fence, which some
/// OpenAI-compatible servers emit even in JSON mode.
pub fn parse_structured<T: DeserializeOwned>(message: &Message) -> Result<T> {
    let text = message.text();
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    if body.is_empty() {
        return Err(Error::Structured("empty response".to_string()));
    }
    serde_json::from_str(body).map_err(|e| Error::Structured(format!("{e}: {body}")))
}
