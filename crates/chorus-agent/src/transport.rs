//! Transport abstraction for model turns

use std::{pin::Pin, sync::Arc, sync::LazyLock, time::Duration};

use async_stream::stream;
use async_trait::async_trait;
use chorus_ai::{
    Context, Model, MessageEventStream, ReasoningLevel, ResponseFormat, StreamOptions,
    providers::LlmProvider, stream::MessageEvent,
};
use futures::StreamExt;
use regex::Regex;
use tokio_stream::Stream;

use crate::error::Result;
use crate::events::AgentEvent;

/// Backoff policy for opening a provider stream
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-indexed), capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.mul_f64(self.backoff_multiplier.powi(attempt as i32));
        scaled.min(self.max_delay)
    }
}

/// Gateways sometimes wrap upstream failures in a generic error body
static TRANSIENT_TEXT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(429|500|502|503|504)\b|rate.?limit|timed?.?out|connection|overloaded").ok()
});

fn looks_transient(error: &chorus_ai::Error) -> bool {
    error.is_retryable()
        || TRANSIENT_TEXT
            .as_ref()
            .is_some_and(|re| re.is_match(&error.to_string()))
}

/// Model-level settings shared by every turn of a role
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model: Model,
    pub reasoning: Option<ReasoningLevel>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ModelSettings {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            reasoning: None,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// What a single model turn is asked to do
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<chorus_ai::Message>,
    pub tools: Vec<chorus_ai::Tool>,
    pub response_format: Option<ResponseFormat>,
}

/// A stream of agent events
pub type AgentEventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

/// Transport for running model turns
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run one model turn, streaming events
    async fn run(&self, request: TurnRequest, settings: &ModelSettings) -> Result<AgentEventStream>;
}

/// Transport that calls an LLM provider directly, retrying transient failures
pub struct ProviderTransport {
    provider: Arc<dyn LlmProvider>,
    retry_config: RetryConfig,
}

impl ProviderTransport {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            retry_config: RetryConfig::default(),
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }
}

async fn open(
    provider: &dyn LlmProvider,
    model: &Model,
    context: &Context,
    options: &StreamOptions,
    retry: &RetryConfig,
) -> chorus_ai::Result<MessageEventStream> {
    let mut attempt = 0;
    loop {
        match provider.stream(model, context, options).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < retry.max_retries && looks_transient(&e) => {
                let delay = retry.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    model = %model.id,
                    ?delay,
                    error = %e,
                    "model request failed, retrying"
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[async_trait]
impl Transport for ProviderTransport {
    async fn run(&self, request: TurnRequest, settings: &ModelSettings) -> Result<AgentEventStream> {
        let context = Context {
            system_prompt: request.system_prompt,
            messages: request.messages,
            tools: request.tools,
        };
        let options = StreamOptions {
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            reasoning: settings.reasoning,
            response_format: request.response_format,
        };
        let model = settings.model.clone();
        let provider = Arc::clone(&self.provider);
        let retry_config = self.retry_config.clone();

        let event_stream: AgentEventStream = Box::pin(stream! {
            yield AgentEvent::TurnStart;

            let mut message_stream = match open(&*provider, &model, &context, &options, &retry_config).await {
                Ok(opened) => opened,
                Err(e) => {
                    yield AgentEvent::Error { message: e.to_string() };
                    return;
                }
            };
            let mut partial = String::new();

            while let Some(event) = message_stream.next().await {
                match event {
                    MessageEvent::TextDelta { delta } => {
                        partial.push_str(&delta);
                        yield AgentEvent::MessageUpdate { text: partial.clone() };
                    }
                    MessageEvent::Done { message, usage } => {
                        yield AgentEvent::MessageEnd { message };
                        yield AgentEvent::TurnEnd { usage };
                        return;
                    }
                    MessageEvent::Error { message } => {
                        yield AgentEvent::Error { message };
                        return;
                    }
                    MessageEvent::ToolCallStart { .. } | MessageEvent::ToolCallDelta { .. } => {}
                }
            }

            yield AgentEvent::Error {
                message: "stream ended without a final message".to_string(),
            };
        });

        Ok(event_stream)
    }
}
