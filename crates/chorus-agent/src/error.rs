//! Error types for chorus-agent

use thiserror::Error;

use crate::graph::Node;
use crate::state::ThreadId;

/// Result type alias using chorus-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during graph execution
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the AI provider layer
    #[error(transparent)]
    Ai(#[from] chorus_ai::Error),

    /// An external capability (lookup service, database) failed
    #[error("Capability unavailable: {0}")]
    Capability(String),

    /// The account id is write-once
    #[error("Account id already set to {existing}, refusing to change it to {attempted}")]
    AccountAlreadySet { existing: String, attempted: String },

    /// Resume payload rejected before injection
    #[error("Invalid resume input: {0}")]
    InvalidResume(String),

    /// Resume called on a thread that is not waiting for input
    #[error("Thread {0} is not suspended")]
    NotSuspended(ThreadId),

    /// Invoke called on a thread that is waiting for input
    #[error("Thread {0} is suspended; resume it with the requested input")]
    AwaitingResume(ThreadId),

    /// No checkpoint exists for the thread
    #[error("Unknown thread: {0}")]
    UnknownThread(ThreadId),

    /// Another execution of the same thread is in progress
    #[error("Thread {0} is already running")]
    ThreadBusy(ThreadId),

    /// The transition table has no successor for this node
    #[error("No transition out of node {0:?}")]
    InvalidTransition(Node),

    /// Thread identifier failed validation
    #[error("Invalid thread id: {0:?}")]
    InvalidThreadId(String),

    /// Checkpoint storage I/O failed
    #[error("Checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Checkpoint (de)serialization failed
    #[error("Checkpoint encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error came from an external capability rather than from
    /// misuse of the graph API
    pub fn is_capability_failure(&self) -> bool {
        matches!(self, Error::Ai(_) | Error::Capability(_))
    }
}
