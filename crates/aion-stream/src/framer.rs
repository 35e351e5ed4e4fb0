//! Server-Sent Events wire format.
//!
//! Every event becomes one record of `data:` fields terminated by a blank
//! line:
//! - `Fragment(text)` is sent as `data: <text> \n\n` (the payload carries one
//!   trailing space)
//! - `ErrorNotice(text)` is sent as `data: [ERROR: <text>]\n\n`
//! - `Truncated` is sent as `data: [TRUNCATED]\n\n`
//! - `Terminator` is sent as `data: [DONE]\n\n`
//!
//! Payload line breaks are written as separate `data:` fields, so a payload
//! can never contain the record delimiter. Carriage returns are normalised
//! to `\n`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, StreamError};
use crate::event::StreamEvent;

pub const DONE_MARKER: &str = "[DONE]";
pub const TRUNCATED_MARKER: &str = "[TRUNCATED]";
const ERROR_PREFIX: &str = "[ERROR: ";
const ERROR_SUFFIX: &str = "]";
const DATA_FIELD: &[u8] = b"data: ";
const RECORD_DELIMITER: &[u8] = b"\n\n";

/// The textual payload carried by an event.
pub fn payload(event: &StreamEvent) -> String {
    match event {
        StreamEvent::Fragment(text) => format!("{text} "),
        StreamEvent::ErrorNotice(text) => format!("{ERROR_PREFIX}{text}{ERROR_SUFFIX}"),
        StreamEvent::Truncated => TRUNCATED_MARKER.to_string(),
        StreamEvent::Terminator => DONE_MARKER.to_string(),
    }
}

/// Encode one event as a complete wire record.
///
/// Normalisation is lossy for carriage returns: SSE readers treat `\r\n`,
/// a lone `\r` and `\n` alike as line endings, so each becomes `\n` and
/// every line is written as its own `data:` field. Payloads without `\r`
/// decode back unchanged.
pub fn frame(event: &StreamEvent) -> Bytes {
    let payload = payload(event);
    let normalized = if payload.contains('\r') {
        payload.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        payload
    };

    let mut buf = BytesMut::with_capacity(normalized.len() + DATA_FIELD.len() + 2);
    for line in normalized.split('\n') {
        buf.put_slice(DATA_FIELD);
        buf.put_slice(line.as_bytes());
        buf.put_u8(b'\n');
    }
    buf.put_u8(b'\n');
    buf.freeze()
}

/// Map a record payload back to the event that produced it.
pub fn classify(payload: &str) -> Result<StreamEvent> {
    if let Some(text) = payload.strip_suffix(' ') {
        return Ok(StreamEvent::Fragment(text.to_string()));
    }
    if payload == DONE_MARKER {
        return Ok(StreamEvent::Terminator);
    }
    if payload == TRUNCATED_MARKER {
        return Ok(StreamEvent::Truncated);
    }
    if let Some(text) = payload
        .strip_prefix(ERROR_PREFIX)
        .and_then(|rest| rest.strip_suffix(ERROR_SUFFIX))
    {
        return Ok(StreamEvent::ErrorNotice(text.to_string()));
    }
    Err(StreamError::Malformed(format!(
        "unrecognised payload {payload:?}"
    )))
}

/// Decode a complete byte sequence of wire records.
pub fn decode(bytes: &[u8]) -> Result<Vec<StreamEvent>> {
    let mut decoder = FrameDecoder::new();
    decoder.push(bytes);

    let mut events = Vec::new();
    while let Some(event) = decoder.next_event() {
        events.push(event?);
    }

    if !decoder.is_empty() {
        return Err(StreamError::Malformed(
            "stream ended inside a record".to_string(),
        ));
    }
    Ok(events)
}

/// Incremental record reader for a byte stream that may split records at
/// arbitrary points.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// True when no partial record is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.iter().all(|b| *b == b'\n' || *b == b'\r')
    }

    /// Next complete record's `data` payload. Records without a data field
    /// (comments, keep-alives) are skipped.
    pub fn next_payload(&mut self) -> Option<String> {
        loop {
            let end = find_delimiter(&self.buffer)?;
            let record: Vec<u8> = self.buffer.drain(..end + RECORD_DELIMITER.len()).collect();
            let record = String::from_utf8_lossy(&record[..end]);

            let mut data: Option<String> = None;
            for line in record.lines() {
                let Some(value) = line.strip_prefix("data:") else {
                    continue;
                };
                let value = value.strip_prefix(' ').unwrap_or(value);
                match data.as_mut() {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(value);
                    }
                    None => data = Some(value.to_string()),
                }
            }

            if data.is_some() {
                return data;
            }
        }
    }

    /// Next complete record, classified as an event.
    pub fn next_event(&mut self) -> Option<Result<StreamEvent>> {
        self.next_payload().map(|payload| classify(&payload))
    }
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(RECORD_DELIMITER.len())
        .position(|window| window == RECORD_DELIMITER)
}
