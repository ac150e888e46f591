//! Streaming events produced by a provider

use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio_stream::Stream;

use crate::message::Message;
use crate::types::Usage;

/// One step of a streamed completion.
///
/// A well-formed stream ends with exactly one `Done` or `Error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    TextDelta { delta: String },
    /// The model started a tool call at position `index` of the response
    ToolCallStart { index: usize, id: String, name: String },
    /// A fragment of a tool call's JSON arguments
    ToolCallDelta { index: usize, delta: String },
    Done { message: Message, usage: Usage },
    Error { message: String },
}

pub type MessageEventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;
