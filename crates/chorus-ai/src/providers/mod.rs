//! LLM providers

pub mod openai;

use async_trait::async_trait;

use crate::{Context, MessageEventStream, Model, Result, StreamOptions};

/// A backend that can stream one completion
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream>;
}
