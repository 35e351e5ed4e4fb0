//! AION streaming pipeline
//!
//! This crate provides:
//! - Event framing for Server-Sent Events (and the matching decoder)
//! - Pluggable response producers (word splitter, OpenAI-compatible upstream)
//! - The stream controller that drives a producer into a client connection
//! - Retry and circuit-breaker helpers for upstream calls

pub mod controller;
pub mod error;
pub mod event;
pub mod framer;
pub mod producer;
pub mod request;
pub mod resilience;
pub mod sink;

// Re-export commonly used types
pub use controller::{
    CANCELLED_NOTICE, CancelReason, Collected, StreamController, StreamLimits, StreamOutcome,
    StreamState, TERMINAL_WRITE_GRACE, TIMEOUT_NOTICE,
};
pub use error::{Result, StreamError};
pub use event::StreamEvent;
pub use framer::{FrameDecoder, decode, frame};
pub use producer::{
    ProducerFactory, ProducerSettings, ReadinessReport, ResponseProducer, UpstreamConfig,
    UpstreamFactory, WordSplitterConfig, WordSplitterFactory, WordSplitterProducer,
    build_factory,
};
pub use request::{ChatRequest, EMPTY_MESSAGE};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};
pub use sink::{ChannelSink, EventSink, SinkClosed, channel};
pub use tokio_util::sync::CancellationToken;
