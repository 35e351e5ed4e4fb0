//! Stream controller: drives a producer into a client sink.
//!
//! State machine: `Idle -> Streaming -> {Completed, Failed, Cancelled}`.
//! - Completed: the producer ended (or the fragment ceiling was hit); a
//!   single `[DONE]` is written.
//! - Failed: the producer errored or the deadline elapsed; an error notice
//!   followed by `[DONE]` is written.
//! - Cancelled: the client went away or the cancellation token fired; a
//!   best-effort `[ERROR: Stream cancelled]` is written and no `[DONE]`.
//!
//! `next()` is always raced against cancellation, client disconnect and the
//! deadline, and is never called again once one of those has been observed.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, StreamError};
use crate::event::StreamEvent;
use crate::framer;
use crate::producer::ResponseProducer;
use crate::sink::EventSink;

pub const CANCELLED_NOTICE: &str = "Stream cancelled";
pub const TIMEOUT_NOTICE: &str = "Stream timed out";

/// How long terminal records may wait on a stalled transport once the
/// deadline has passed, or when no deadline applies to them.
pub const TERMINAL_WRITE_GRACE: Duration = Duration::from_millis(500);

/// Per-request limits applied by the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamLimits {
    /// Fragment ceiling. Reaching it ends the stream normally.
    pub max_fragments: usize,
    /// Absolute wall-clock budget for one stream; `None` disables it.
    pub deadline: Option<Duration>,
    /// Emit `[TRUNCATED]` before `[DONE]` when the ceiling cut the stream.
    pub signal_truncation: bool,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            max_fragments: 200,
            deadline: Some(Duration::from_secs(120)),
            signal_truncation: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    ClientDisconnected,
    Requested,
}

/// Summary of one finished stream.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub state: StreamState,
    pub fragments: usize,
    pub truncated: bool,
    pub timed_out: bool,
    pub cancel_reason: Option<CancelReason>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

/// Result of a non-streaming run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collected {
    pub text: String,
    pub fragments: usize,
    pub truncated: bool,
}

enum Ending {
    Complete { truncated: bool },
    Fail(String),
    TimedOut,
    Cancel(CancelReason),
}

enum Step {
    Produced(Result<Option<String>>),
    Stop(Ending),
}

pub struct StreamController {
    limits: StreamLimits,
    cancel: CancellationToken,
    emitted: usize,
}

impl StreamController {
    pub fn new(limits: StreamLimits, cancel: CancellationToken) -> Self {
        Self {
            limits,
            cancel,
            emitted: 0,
        }
    }

    /// Stream every fragment of `producer` into `sink`, then write the
    /// terminal marker(s) for whichever state the stream ended in.
    pub async fn run<S: EventSink>(
        mut self,
        mut producer: Box<dyn ResponseProducer>,
        sink: &mut S,
    ) -> StreamOutcome {
        let started = Instant::now();
        let deadline = self.limits.deadline.map(|budget| started + budget);
        debug!(producer = producer.name(), "Stream started");

        let ending = loop {
            if self.emitted >= self.limits.max_fragments {
                let truncated = producer.truncated() || producer.has_pending();
                if truncated {
                    warn!(
                        max_fragments = self.limits.max_fragments,
                        "Fragment ceiling reached"
                    );
                }
                break Ending::Complete { truncated };
            }
            if self.cancel.is_cancelled() {
                break Ending::Cancel(CancelReason::Requested);
            }
            if sink.is_closed() {
                break Ending::Cancel(CancelReason::ClientDisconnected);
            }

            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Stop(Ending::Cancel(CancelReason::Requested)),
                _ = sink.closed() => Step::Stop(Ending::Cancel(CancelReason::ClientDisconnected)),
                _ = deadline_elapsed(deadline) => Step::Stop(Ending::TimedOut),
                result = producer.next() => Step::Produced(result),
            };

            match step {
                Step::Produced(Ok(Some(text))) => {
                    let frame = framer::frame(&StreamEvent::Fragment(text));
                    let written = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => Err(Ending::Cancel(CancelReason::Requested)),
                        _ = deadline_elapsed(deadline) => Err(Ending::TimedOut),
                        result = sink.write(frame) => {
                            result.map_err(|_| Ending::Cancel(CancelReason::ClientDisconnected))
                        }
                    };
                    match written {
                        Ok(()) => self.emitted += 1,
                        Err(ending) => break ending,
                    }
                }
                Step::Produced(Ok(None)) => {
                    break Ending::Complete {
                        truncated: producer.truncated(),
                    };
                }
                Step::Produced(Err(err)) => break Ending::Fail(err.to_string()),
                Step::Stop(ending) => break ending,
            }
        };

        // Release the producer (and any upstream connection) before the
        // terminal writes.
        drop(producer);

        let mut outcome = StreamOutcome {
            state: StreamState::Idle,
            fragments: self.emitted,
            truncated: false,
            timed_out: false,
            cancel_reason: None,
            error: None,
            elapsed: Duration::ZERO,
        };

        match ending {
            Ending::Complete { truncated } => {
                let mut records = Vec::with_capacity(2);
                if truncated && self.limits.signal_truncation {
                    records.push(StreamEvent::Truncated);
                }
                records.push(StreamEvent::Terminator);
                self.write_terminal(sink, records, deadline).await;
                outcome.state = StreamState::Completed;
                outcome.truncated = truncated;
            }
            Ending::Fail(message) => {
                let records = vec![StreamEvent::error(message.clone()), StreamEvent::Terminator];
                self.write_terminal(sink, records, deadline).await;
                outcome.state = StreamState::Failed;
                outcome.error = Some(message);
            }
            Ending::TimedOut => {
                let records = vec![StreamEvent::error(TIMEOUT_NOTICE), StreamEvent::Terminator];
                self.write_terminal(sink, records, deadline).await;
                outcome.state = StreamState::Failed;
                outcome.timed_out = true;
                outcome.error = Some(TIMEOUT_NOTICE.to_string());
            }
            Ending::Cancel(reason) => {
                let notice = framer::frame(&StreamEvent::error(CANCELLED_NOTICE));
                match reason {
                    CancelReason::ClientDisconnected => {
                        let _ = sink.try_write(notice);
                    }
                    CancelReason::Requested => {
                        let _ = tokio::time::timeout(TERMINAL_WRITE_GRACE, sink.write(notice)).await;
                    }
                }
                outcome.state = StreamState::Cancelled;
                outcome.cancel_reason = Some(reason);
            }
        }

        outcome.elapsed = started.elapsed();
        log_outcome(&outcome);
        outcome
    }

    /// Drain `producer` into a single reply under the same ceiling,
    /// deadline and cancellation rules as [`run`](Self::run).
    pub async fn collect(self, mut producer: Box<dyn ResponseProducer>) -> Result<Collected> {
        let started = Instant::now();
        let deadline = self.limits.deadline.map(|budget| started + budget);

        let mut fragments = Vec::new();
        let truncated = loop {
            if fragments.len() >= self.limits.max_fragments {
                break producer.truncated() || producer.has_pending();
            }

            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(StreamError::Cancelled),
                _ = deadline_elapsed(deadline) => return Err(StreamError::Timeout),
                result = producer.next() => result,
            };

            match next? {
                Some(fragment) => fragments.push(fragment),
                None => break producer.truncated(),
            }
        };

        debug!(
            fragments = fragments.len(),
            truncated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Collected reply"
        );
        Ok(Collected {
            fragments: fragments.len(),
            text: fragments.join(" "),
            truncated,
        })
    }

    /// Write the closing records in order. The writes share one budget: the
    /// stream deadline, but never less than [`TERMINAL_WRITE_GRACE`] from
    /// now. A record that cannot be delivered in time abandons the
    /// rest, and dropping the sink then hard-closes the stream.
    async fn write_terminal<S: EventSink>(
        &self,
        sink: &mut S,
        records: Vec<StreamEvent>,
        deadline: Option<Instant>,
    ) {
        let until = deadline.map(|at| at.max(Instant::now() + TERMINAL_WRITE_GRACE));
        for event in records {
            let frame = framer::frame(&event);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(event = %event, "Cancelled before terminal write");
                    return;
                }
                _ = deadline_elapsed(until) => {
                    warn!(event = %event, "Client stalled, abandoning terminal write");
                    return;
                }
                result = sink.write(frame) => {
                    if result.is_err() {
                        debug!(event = %event, "Client gone before terminal write");
                        return;
                    }
                }
            }
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn log_outcome(outcome: &StreamOutcome) {
    let elapsed_ms = outcome.elapsed.as_millis() as u64;
    match outcome.state {
        StreamState::Completed => info!(
            fragments = outcome.fragments,
            truncated = outcome.truncated,
            elapsed_ms,
            "Streaming completed"
        ),
        StreamState::Failed => error!(
            fragments = outcome.fragments,
            timed_out = outcome.timed_out,
            error = outcome.error.as_deref().unwrap_or_default(),
            elapsed_ms,
            "Streaming failed"
        ),
        StreamState::Cancelled => warn!(
            fragments = outcome.fragments,
            reason = ?outcome.cancel_reason,
            elapsed_ms,
            "Stream cancelled"
        ),
        StreamState::Idle | StreamState::Streaming => {}
    }
}
