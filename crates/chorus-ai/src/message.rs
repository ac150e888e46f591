//! Conversation messages exchanged with a model

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Provider, StopReason, Usage};

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A content block inside a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text { text: String },
    ToolCall { id: String, name: String, arguments: Value },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Content::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            Content::ToolCall { .. } => None,
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Bookkeeping carried by assistant messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMetadata {
    /// Agent or graph node that produced the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub timestamp: i64,
}

/// One entry of a conversation, tagged by `role` when serialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        content: Vec<Content>,
        #[serde(default)]
        timestamp: i64,
    },
    Assistant {
        content: Vec<Content>,
        #[serde(flatten)]
        metadata: AssistantMetadata,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: Vec<Content>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        timestamp: i64,
    },
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Message::User {
            content: vec![Content::text(text)],
            timestamp: now_millis(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Message::Assistant {
            content: vec![Content::text(text)],
            metadata: AssistantMetadata {
                timestamp: now_millis(),
                ..Default::default()
            },
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: Vec<Content>,
        is_error: bool,
    ) -> Self {
        Message::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content,
            is_error,
            timestamp: now_millis(),
        }
    }

    /// Record which agent or node produced an assistant message.
    /// Messages of other roles pass through untouched.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        if let Message::Assistant { metadata, .. } = &mut self {
            metadata.name = Some(name.into());
        }
        self
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Message::Assistant { metadata, .. } => metadata.name.as_deref(),
            _ => None,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::ToolResult { .. } => "tool_result",
        }
    }

    pub fn content(&self) -> &[Content] {
        match self {
            Message::User { content, .. }
            | Message::Assistant { content, .. }
            | Message::ToolResult { content, .. } => content,
        }
    }

    /// Tool calls requested by an assistant message, in order
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        let Message::Assistant { content, .. } = self else {
            return Vec::new();
        };
        content
            .iter()
            .filter_map(|block| match block {
                Content::ToolCall { id, name, arguments } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }),
                Content::Text { .. } => None,
            })
            .collect()
    }

    /// All text blocks joined together
    pub fn text(&self) -> String {
        self.content().iter().filter_map(Content::as_text).collect()
    }
}
