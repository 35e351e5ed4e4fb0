use std::time::Duration;

use aion_stream::{
    CancellationToken, ChatRequest, FrameDecoder, ProducerFactory, StreamController, StreamEvent,
    StreamLimits, StreamState, WordSplitterConfig, WordSplitterFactory, channel, decode, frame,
};

fn factory(max_fragments: usize) -> WordSplitterFactory {
    WordSplitterFactory::new(WordSplitterConfig {
        fragment_delay_ms: 1,
        max_fragments,
    })
}

/// Run one request through factory, controller and channel sink, returning
/// the raw wire bytes.
async fn stream_message(message: &str, limits: StreamLimits) -> (Vec<u8>, StreamState) {
    let producer = factory(limits.max_fragments)
        .create(&ChatRequest::new(message))
        .await
        .expect("word splitter never fails to construct");
    let (mut sink, mut rx) = channel(8);
    let controller = StreamController::new(limits, CancellationToken::new());
    let task = tokio::spawn(async move { controller.run(producer, &mut sink).await });

    let mut wire = Vec::new();
    while let Some(chunk) = rx.recv().await {
        wire.extend_from_slice(&chunk);
    }
    let outcome = task.await.expect("controller task panicked");
    (wire, outcome.state)
}

#[tokio::test]
async fn hello_world_end_to_end() {
    let (wire, state) = stream_message("hello world", StreamLimits::default()).await;
    assert_eq!(state, StreamState::Completed);
    assert_eq!(
        String::from_utf8(wire).unwrap(),
        "data: hello \n\ndata: world \n\ndata: [DONE]\n\n"
    );
}

#[tokio::test]
async fn every_stream_ends_with_one_terminator() {
    let messages = [
        "single",
        "two words",
        "a message with [DONE] inside it",
        "unicode – ünïcødé ✓ text",
        "   leading and trailing   ",
    ];
    for message in messages {
        let (wire, _) = stream_message(message, StreamLimits::default()).await;
        let events = decode(&wire).unwrap();
        let terminators = events.iter().filter(|e| e.is_terminator()).count();
        assert_eq!(terminators, 1, "message {message:?}");
        assert_eq!(events.last(), Some(&StreamEvent::Terminator));

        let fragments: Vec<String> = events
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Fragment(text) => Some(text),
                _ => None,
            })
            .collect();
        let expected: Vec<String> = message.split_whitespace().map(str::to_string).collect();
        assert_eq!(fragments, expected);
    }
}

#[tokio::test]
async fn token_count_above_ceiling_is_capped() {
    let message = vec!["word"; 250].join(" ");
    let limits = StreamLimits {
        max_fragments: 200,
        deadline: Some(Duration::from_secs(30)),
        ..StreamLimits::default()
    };
    let (wire, state) = stream_message(&message, limits).await;
    assert_eq!(state, StreamState::Completed);

    let events = decode(&wire).unwrap();
    let fragments = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Fragment(_)))
        .count();
    assert_eq!(fragments, 200);
    assert_eq!(events.last(), Some(&StreamEvent::Terminator));
}

#[tokio::test]
async fn message_exactly_at_ceiling_is_complete() {
    let message = vec!["word"; 200].join(" ");
    let limits = StreamLimits {
        max_fragments: 200,
        signal_truncation: true,
        ..StreamLimits::default()
    };
    let (wire, state) = stream_message(&message, limits.clone()).await;
    assert_eq!(state, StreamState::Completed);
    let events = decode(&wire).unwrap();
    assert!(!events.contains(&StreamEvent::Truncated));
    assert_eq!(events.len(), 201);

    let producer = factory(200)
        .create(&ChatRequest::new(message).with_stream(false))
        .await
        .expect("word splitter never fails to construct");
    let collected = StreamController::new(limits, CancellationToken::new())
        .collect(producer)
        .await
        .unwrap();
    assert_eq!(collected.fragments, 200);
    assert!(!collected.truncated);
}

#[tokio::test]
async fn incremental_decoder_matches_whole_decode() {
    let events = vec![
        StreamEvent::fragment("split"),
        StreamEvent::fragment("across\nlines"),
        StreamEvent::error("oops"),
        StreamEvent::Terminator,
    ];
    let wire: Vec<u8> = events.iter().flat_map(|e| frame(e).to_vec()).collect();

    let mut decoder = FrameDecoder::new();
    let mut decoded = Vec::new();
    for byte in &wire {
        decoder.push(std::slice::from_ref(byte));
        while let Some(event) = decoder.next_event() {
            decoded.push(event.unwrap());
        }
    }
    assert_eq!(decoded, events);
    assert_eq!(decode(&wire).unwrap(), events);
}
