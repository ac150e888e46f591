//! chorus-ai: message model and OpenAI-compatible provider layer
//!
//! Every chorus crate speaks in terms of [`Message`]; providers turn a
//! [`Context`] into a stream of [`stream::MessageEvent`]s.

pub mod error;
pub mod message;
pub mod models;
pub mod providers;
pub mod stream;
pub mod structured;
pub mod types;

pub use error::{Error, Result};
pub use message::{AssistantMetadata, Content, Message, ToolCall};
pub use stream::MessageEventStream;
pub use structured::ResponseFormat;
pub use types::*;
