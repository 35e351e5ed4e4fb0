//! Connection handle capability handed to the stream controller.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// The client transport is gone; nothing more can be written.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("client connection closed")]
pub struct SinkClosed;

/// Write side of a live client connection.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Write one framed record, waiting while the transport applies
    /// backpressure.
    async fn write(&mut self, frame: Bytes) -> Result<(), SinkClosed>;

    /// Write without waiting. Fails if the transport is closed or full.
    fn try_write(&mut self, frame: Bytes) -> Result<(), SinkClosed>;

    fn is_closed(&self) -> bool;

    /// Resolves once the client has gone away.
    async fn closed(&self);
}

/// Sink backed by a bounded channel whose receiver feeds the HTTP body.
///
/// The HTTP server drops the body (and with it the receiver) when the client
/// disconnects, which is what `closed` observes.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

/// Create a sink and the receiver that drains it.
pub fn channel(capacity: usize) -> (ChannelSink, mpsc::Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelSink::new(tx), rx)
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn write(&mut self, frame: Bytes) -> Result<(), SinkClosed> {
        self.tx.send(frame).await.map_err(|_| SinkClosed)
    }

    fn try_write(&mut self, frame: Bytes) -> Result<(), SinkClosed> {
        self.tx.try_send(frame).map_err(|_| SinkClosed)
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}
