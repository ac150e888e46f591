//! Chat model handle shared by every LLM-backed role

use std::sync::Arc;

use chorus_ai::{Message, Usage};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::events::AgentEvent;
use crate::transport::{ModelSettings, Transport, TurnRequest};

/// A transport bound to model settings.
///
/// Cloning is cheap; clones share the transport and the usage tally.
#[derive(Clone)]
pub struct ChatModel {
    transport: Arc<dyn Transport>,
    settings: ModelSettings,
    usage: Arc<Mutex<Usage>>,
}

impl ChatModel {
    pub fn new(transport: Arc<dyn Transport>, settings: ModelSettings) -> Self {
        Self {
            transport,
            settings,
            usage: Arc::new(Mutex::new(Usage::default())),
        }
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    /// Token usage accumulated across every call made through this handle
    pub fn total_usage(&self) -> Usage {
        self.usage.lock().clone()
    }

    /// Run one turn to completion and return the final assistant message.
    ///
    /// Streaming updates are forwarded to `events` when a sender is given.
    pub async fn invoke(
        &self,
        request: TurnRequest,
        events: Option<&broadcast::Sender<AgentEvent>>,
    ) -> Result<Message> {
        let mut stream = self.transport.run(request, &self.settings).await?;
        let mut final_message = None;

        while let Some(event) = stream.next().await {
            let failure = match &event {
                AgentEvent::MessageEnd { message } => {
                    final_message = Some(message.clone());
                    None
                }
                AgentEvent::TurnEnd { usage } => {
                    self.usage.lock().add(usage);
                    None
                }
                AgentEvent::Error { message } => Some(message.clone()),
                _ => None,
            };
            if let Some(tx) = events {
                let _ = tx.send(event);
            }
            if let Some(message) = failure {
                return Err(Error::Ai(chorus_ai::Error::Stream(message)));
            }
        }

        final_message.ok_or_else(|| {
            Error::Ai(chorus_ai::Error::Incomplete(
                "turn ended without a message".to_string(),
            ))
        })
    }
}
