//! OpenAI Chat Completions API provider
//!
//! Also serves any OpenAI-compatible endpoint (Groq, OpenRouter, Ollama).

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::LlmProvider;
use crate::error::{Error, Result};
use crate::message::{AssistantMetadata, Content, Message};
use crate::stream::{MessageEvent, MessageEventStream};
use crate::types::{Context, Model, StopReason, StreamOptions, Tool, Usage};

pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: Some(api_key.into()),
        }
    }

    /// For local servers that take no credentials (Ollama)
    pub fn without_key() -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: None,
        }
    }

    fn authorization(&self) -> Result<Option<HeaderValue>> {
        self.api_key
            .as_deref()
            .map(|key| {
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|e| Error::Config(format!("API key is not a valid header: {e}")))
            })
            .transpose()
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream> {
        if model.base_url.is_empty() {
            return Err(Error::Config(format!("model {} has no base URL", model.id)));
        }

        let body = ChatRequest::new(model, context, options);
        tracing::debug!(model = %model.id, messages = body.messages.len(), tools = body.tools.len(), "chat completion request");

        let mut request = self
            .client
            .post(format!("{}/chat/completions", model.base_url))
            .json(&body);
        if let Some(auth) = self.authorization()? {
            request = request.header(AUTHORIZATION, auth);
        }

        let source = EventSource::new(request)
            .map_err(|e| Error::Stream(format!("cannot open event stream: {e}")))?;
        Ok(Box::pin(events(source, model.clone())))
    }
}

fn events(mut source: EventSource, model: Model) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut decoder = ChunkDecoder::default();

        while let Some(event) = source.next().await {
            let data = match event {
                Ok(Event::Open) => continue,
                Ok(Event::Message(msg)) => msg.data,
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    let body = response.text().await.unwrap_or_default();
                    let error = Error::Status { status: status.as_u16(), body };
                    yield MessageEvent::Error { message: error.to_string() };
                    return;
                }
                Err(e) => {
                    yield MessageEvent::Error { message: Error::Stream(e.to_string()).to_string() };
                    return;
                }
            };
            if data == "[DONE]" {
                break;
            }

            match serde_json::from_str::<Chunk>(&data) {
                Ok(chunk) => {
                    for event in decoder.apply(chunk) {
                        yield event;
                    }
                }
                Err(e) => {
                    yield MessageEvent::Error { message: format!("malformed chunk: {e}") };
                    return;
                }
            }
        }
        source.close();

        yield decoder.finish(&model);
    }
}

/// Accumulates streamed chunks into one assistant message
#[derive(Debug, Default)]
struct ChunkDecoder {
    text: String,
    calls: Vec<PendingCall>,
    finish_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl ChunkDecoder {
    fn apply(&mut self, chunk: Chunk) -> Vec<MessageEvent> {
        let mut out = Vec::new();

        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                self.text.push_str(&text);
                out.push(MessageEvent::TextDelta { delta: text });
            }

            for part in choice.delta.tool_calls {
                if self.calls.len() <= part.index {
                    self.calls.resize_with(part.index + 1, PendingCall::default);
                }
                let call = &mut self.calls[part.index];
                if let Some(id) = part.id {
                    call.id = id;
                }
                let Some(function) = part.function else {
                    continue;
                };
                if let Some(name) = function.name {
                    call.name = name.clone();
                    out.push(MessageEvent::ToolCallStart {
                        index: part.index,
                        id: call.id.clone(),
                        name,
                    });
                }
                if let Some(fragment) = function.arguments.filter(|a| !a.is_empty()) {
                    call.arguments.push_str(&fragment);
                    out.push(MessageEvent::ToolCallDelta {
                        index: part.index,
                        delta: fragment,
                    });
                }
            }

            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }

        // Sent on the last chunk when include_usage is set
        if let Some(usage) = chunk.usage {
            self.usage = Usage {
                input: usage.prompt_tokens,
                output: usage.completion_tokens,
                cache_read: usage.prompt_tokens_details.map_or(0, |d| d.cached_tokens),
            };
        }
        out
    }

    fn finish(self, model: &Model) -> MessageEvent {
        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(Content::text(self.text));
        }
        for call in self.calls {
            if call.id.is_empty() || call.name.is_empty() {
                tracing::warn!(?call, "dropping incomplete tool call");
                continue;
            }
            let arguments = if call.arguments.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                match serde_json::from_str(&call.arguments) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(tool = %call.name, "tool arguments are not JSON: {}", e);
                        Value::String(call.arguments)
                    }
                }
            };
            content.push(Content::tool_call(call.id, call.name, arguments));
        }

        let message = Message::Assistant {
            content,
            metadata: AssistantMetadata {
                provider: Some(model.provider),
                model: Some(model.id.clone()),
                usage: self.usage.clone(),
                stop_reason: self
                    .finish_reason
                    .as_deref()
                    .and_then(StopReason::from_finish_reason),
                timestamp: chrono::Utc::now().timestamp_millis(),
                ..Default::default()
            },
        };
        MessageEvent::Done {
            message,
            usage: self.usage,
        }
    }
}

// ---- request body ----

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    stream_options: IncludeUsage,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

impl ChatRequest {
    fn new(model: &Model, context: &Context, options: &StreamOptions) -> Self {
        let system = context
            .system_prompt
            .as_ref()
            .map(|prompt| WireMessage::plain("system", prompt.clone()));
        let messages = system
            .into_iter()
            .chain(context.messages.iter().map(WireMessage::from))
            .collect();
        let tools: Vec<WireTool> = context.tools.iter().map(WireTool::from).collect();

        // Reasoning models take an effort level and reject sampling knobs
        let (temperature, reasoning_effort) = if model.reasoning {
            (None, options.reasoning.and_then(|r| r.as_effort()))
        } else {
            (options.temperature, None)
        };

        Self {
            model: model.id.clone(),
            messages,
            stream: true,
            stream_options: IncludeUsage { include_usage: true },
            tool_choice: (!tools.is_empty()).then_some("auto"),
            tools,
            max_completion_tokens: options.max_tokens,
            temperature,
            reasoning_effort,
            response_format: options.response_format.as_ref().map(|f| f.to_request_value()),
        }
    }
}

#[derive(Debug, Serialize)]
struct IncludeUsage {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn plain(role: &'static str, content: String) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        match message {
            Message::User { .. } => WireMessage::plain("user", message.text()),
            Message::ToolResult { tool_call_id, .. } => WireMessage {
                tool_call_id: Some(tool_call_id.clone()),
                ..WireMessage::plain("tool", message.text())
            },
            Message::Assistant { .. } => {
                let text = message.text();
                WireMessage {
                    role: "assistant",
                    content: (!text.is_empty()).then_some(text),
                    tool_calls: message
                        .tool_calls()
                        .into_iter()
                        .map(|call| WireToolCall {
                            id: call.id,
                            kind: "function",
                            function: WireFunctionCall {
                                name: call.name,
                                arguments: call.arguments.to_string(),
                            },
                        })
                        .collect(),
                    tool_call_id: None,
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

impl From<&Tool> for WireTool {
    fn from(tool: &Tool) -> Self {
        Self {
            kind: "function",
            function: WireFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

// ---- streamed response ----

#[derive(Debug, Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallPart>,
}

#[derive(Debug, Deserialize)]
struct ToolCallPart {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionPart>,
}

#[derive(Debug, Deserialize)]
struct FunctionPart {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    prompt_tokens_details: Option<CachedTokens>,
}

#[derive(Debug, Deserialize)]
struct CachedTokens {
    #[serde(default)]
    cached_tokens: u32,
}
