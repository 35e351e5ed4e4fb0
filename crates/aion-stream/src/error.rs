//! Error types for the streaming pipeline

use thiserror::Error;

/// Streaming pipeline error types
#[derive(Error, Debug)]
pub enum StreamError {
    /// The inbound request was rejected before any stream was opened.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The producer failed after streaming had begun.
    #[error("{0}")]
    Producer(String),

    #[error("Stream cancelled")]
    Cancelled,

    #[error("Stream timed out")]
    Timeout,

    #[error("Upstream returned HTTP {status}: {message}")]
    UpstreamHttp {
        status: u16,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Circuit breaker is open - upstream unavailable")]
    CircuitOpen,

    #[error("Malformed event record: {0}")]
    Malformed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StreamError {
    /// Whether a failed upstream call is worth repeating.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::UpstreamHttp { status, .. } => *status == 429 || *status >= 500,
            StreamError::Http(err) => err.is_connect() || err.is_timeout(),
            _ => false,
        }
    }

    /// Delay requested by the upstream, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            StreamError::UpstreamHttp {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Result type alias for streaming operations
pub type Result<T> = std::result::Result<T, StreamError>;
