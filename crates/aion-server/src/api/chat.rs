use std::convert::Infallible;
use std::panic::AssertUnwindSafe;

use aion_stream::{
    ChannelSink, ChatRequest, EventSink, ResponseProducer, StreamController, StreamEvent,
    TERMINAL_WRITE_GRACE, channel, frame,
};
use axum::{
    Json,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{HeaderName, HeaderValue, header},
    response::{IntoResponse, Response},
};
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::error::{ApiError, INTERNAL_ERROR_MESSAGE, panic_message};
use crate::state::AppState;

pub const CONVERSATION_ID_HEADER: HeaderName = HeaderName::from_static("x-conversation-id");

/// Reply body for `"stream": false`.
#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub conversation_id: String,
    pub response: String,
    pub fragments: usize,
    pub truncated: bool,
}

/// POST /api/v1/chat
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        info!(reason = %rejection.body_text(), "Rejected chat payload");
        ApiError::bad_request(rejection.body_text())
    })?;
    request.validate()?;

    let conversation_id = request
        .conversation_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(
        conversation_id = %conversation_id,
        message_chars = request.message.chars().count(),
        stream = request.stream,
        producer = state.producers.kind(),
        "Chat request accepted"
    );

    let producer = state.producers.create(&request).await?;
    let controller = StreamController::new(
        state.config.limits.clone(),
        state.shutdown.child_token(),
    );

    if !request.stream {
        let collected = controller.collect(producer).await?;
        let mut response = Json(ChatReply {
            conversation_id: conversation_id.clone(),
            response: collected.text,
            fragments: collected.fragments,
            truncated: collected.truncated,
        })
        .into_response();
        set_conversation_header(&mut response, &conversation_id);
        return Ok(response);
    }

    let (sink, rx) = channel(state.config.channel_capacity);
    spawn_stream(controller, producer, sink, &conversation_id);

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    set_conversation_header(&mut response, &conversation_id);
    Ok(response)
}

fn set_conversation_header(response: &mut Response, conversation_id: &str) {
    // Client-supplied ids that are not valid header values are echoed only in bodies.
    if let Ok(value) = HeaderValue::from_str(conversation_id) {
        response.headers_mut().insert(CONVERSATION_ID_HEADER, value);
    }
}

/// Drive the controller on its own task. A panic inside the pipeline still
/// ends the stream with an error notice and the terminator.
fn spawn_stream(
    controller: StreamController,
    producer: Box<dyn ResponseProducer>,
    mut sink: ChannelSink,
    conversation_id: &str,
) {
    let span = info_span!("stream", conversation_id = %conversation_id);
    let mut fallback = sink.clone();
    tokio::spawn(
        async move {
            let run = AssertUnwindSafe(controller.run(producer, &mut sink)).catch_unwind();
            if let Err(panic) = run.await {
                error!(
                    panic = panic_message(panic.as_ref()),
                    "Stream task panicked"
                );
                for event in [
                    StreamEvent::error(INTERNAL_ERROR_MESSAGE),
                    StreamEvent::Terminator,
                ] {
                    let write = fallback.write(frame(&event));
                    match tokio::time::timeout(TERMINAL_WRITE_GRACE, write).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => break,
                        Err(_) => {
                            warn!(event = %event, "Client stalled, abandoning terminal write");
                            break;
                        }
                    }
                }
            }
        }
        .instrument(span),
    );
}
