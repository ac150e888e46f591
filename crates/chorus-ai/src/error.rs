//! Error types for chorus-ai

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The provider answered with a non-success status
    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// No key configured; holds the environment variable that was consulted
    #[error("Missing API key (set {0})")]
    MissingApiKey(String),

    /// The event stream broke off or carried an error event
    #[error("Stream error: {0}")]
    Stream(String),

    /// A response ended before producing a complete message
    #[error("Incomplete response: {0}")]
    Incomplete(String),

    #[error("Structured output error: {0}")]
    Structured(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => !e.is_builder() && !e.is_decode(),
            Error::Status { status, .. } => *status == 429 || (500..600).contains(status),
            Error::RateLimited { .. } | Error::Stream(_) => true,
            _ => false,
        }
    }
}
