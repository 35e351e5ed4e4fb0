//! Inbound chat request

use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};

/// Message returned to clients that send an empty or whitespace-only message.
pub const EMPTY_MESSAGE: &str = "Message cannot be empty";

/// A chat message submitted by a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Whether the reply should be delivered as an event stream.
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
            stream: true,
        }
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Rejects requests whose message is empty after trimming.
    pub fn validate(&self) -> Result<()> {
        if self.message.trim().is_empty() {
            return Err(StreamError::Validation(EMPTY_MESSAGE.to_string()));
        }
        Ok(())
    }
}
