//! Conversation state shared by every node of the graph

use std::fmt;

use chorus_ai::Message;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of a conversation thread.
///
/// Thread ids end up as checkpoint file names, so they are restricted to
/// ASCII alphanumerics, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    const MAX_LEN: usize = 128;

    /// Generate a fresh random thread id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Validate and wrap a caller-supplied id
    pub fn parse(s: &str) -> Result<Self> {
        let valid = !s.is_empty()
            && s.len() <= Self::MAX_LEN
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidThreadId(s.to_string()))
        }
    }

    #[cfg(test)]
    pub(crate) fn from_static(s: &'static str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The single mutable record carried through the graph.
///
/// `messages` only ever grows and `account_id` is write-once; both are
/// enforced by keeping the fields private.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    account_id: Option<String>,
    #[serde(default)]
    messages: Vec<Message>,
    /// Step budget for the current work run
    #[serde(default)]
    pub remaining_steps: u32,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    pub fn is_verified(&self) -> bool {
        self.account_id.is_some()
    }

    /// Record the verified account.
    ///
    /// Setting the same value again is a no-op; a different value is rejected.
    /// Empty ids are ignored.
    pub fn set_account_id(&mut self, account_id: impl Into<String>) -> Result<()> {
        let account_id = account_id.into();
        if account_id.trim().is_empty() {
            return Ok(());
        }
        match &self.account_id {
            None => {
                self.account_id = Some(account_id);
                Ok(())
            }
            Some(existing) if *existing == account_id => Ok(()),
            Some(existing) => Err(Error::AccountAlreadySet {
                existing: existing.clone(),
                attempted: account_id,
            }),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    /// Messages appended since the log had `len` entries
    pub fn messages_since(&self, len: usize) -> &[Message] {
        self.messages.get(len..).unwrap_or(&[])
    }
}
