//! Logical events delivered to a streaming client

use std::fmt;

/// One event of a response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A unit of partial content.
    Fragment(String),
    /// An in-band failure notice.
    ErrorNotice(String),
    /// The fragment ceiling cut the response short.
    Truncated,
    /// End of stream. Always the last event of a completed or failed stream.
    Terminator,
}

impl StreamEvent {
    pub fn fragment(text: impl Into<String>) -> Self {
        Self::Fragment(text.into())
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::ErrorNotice(text.into())
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::Terminator)
    }
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fragment(text) => write!(f, "fragment({text:?})"),
            Self::ErrorNotice(text) => write!(f, "error({text:?})"),
            Self::Truncated => f.write_str("truncated"),
            Self::Terminator => f.write_str("done"),
        }
    }
}
