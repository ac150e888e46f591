//! Tools the sub-agents can call

use std::sync::Arc;

use async_trait::async_trait;
use chorus_ai::Content;
use serde::Serialize;
use serde_json::Value;

/// What a tool hands back to the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: Vec<Content>,
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(message)
        }
    }

    /// Rows or records rendered as compact JSON text
    pub fn json(value: &impl Serialize) -> Self {
        serde_json::to_string(value).map_or_else(
            |e| Self::error(format!("Failed to encode result: {e}")),
            Self::text,
        )
    }

    pub fn text_content(&self) -> String {
        let parts: Vec<&str> = self.content.iter().filter_map(Content::as_text).collect();
        parts.join("\n")
    }
}

/// Facts about the conversation a tool may rely on.
///
/// Customer-scoped tools read the verified account from here and never
/// from model-written arguments.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub account_id: Option<String>,
}

impl ToolContext {
    pub fn for_account(account_id: Option<&str>) -> Self {
        Self {
            account_id: account_id.map(str::to_string),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the arguments object
    fn parameters(&self) -> Value;

    /// Run with arguments that already passed schema validation
    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> ToolResult;

    /// Definition advertised to the model
    fn definition(&self) -> chorus_ai::Tool {
        chorus_ai::Tool::new(self.name(), self.description(), self.parameters())
    }
}

pub type BoxedTool = Arc<dyn Tool>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct AccountEcho;

    #[async_trait]
    impl Tool for AccountEcho {
        fn name(&self) -> &str {
            "account_echo"
        }
        fn description(&self) -> &str {
            "Echoes the verified account"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _arguments: Value, ctx: &ToolContext) -> ToolResult {
            ctx.account_id
                .as_deref()
                .map_or_else(|| ToolResult::error("no verified account"), ToolResult::text)
        }
    }

    #[tokio::test]
    async fn test_tool_sees_verified_account_only() {
        let ok = AccountEcho
            .execute(json!({"account": "99"}), &ToolContext::for_account(Some("10")))
            .await;
        assert_eq!(ok, ToolResult::text("10"));

        let err = AccountEcho.execute(json!({}), &ToolContext::default()).await;
        assert!(err.is_error);
        assert_eq!(err.text_content(), "no verified account");
    }

    #[test]
    fn test_definition() {
        let def = AccountEcho.definition();
        assert_eq!(def.name, "account_echo");
        assert_eq!(def.parameters["type"], "object");
    }

    #[test]
    fn test_json_result() {
        let result = ToolResult::json(&json!([{"Title": "Let There Be Rock"}]));
        assert!(!result.is_error);
        assert_eq!(result.text_content(), r#"[{"Title":"Let There Be Rock"}]"#);
    }
}
