//! OpenAI-compatible upstream producer.
//!
//! Sends the message to `{base_url}/chat/completions` with `stream: true` and
//! yields every non-empty `choices[].delta.content` as a fragment. The HTTP
//! request is opened in `create`, under the retry policy and circuit breaker,
//! so connection failures surface before the client stream opens.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::{ProducerFactory, ReadinessReport, ResponseProducer};
use crate::error::{Result, StreamError};
use crate::framer::{DONE_MARKER, FrameDecoder};
use crate::request::ChatRequest;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};

pub(super) const KIND: &str = "upstream";

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the bearer token.
    pub api_key_env: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub connect_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            connect_timeout_ms: 5_000,
            probe_timeout_ms: 2_000,
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    message: String,
}

type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Fragments decoded from one upstream streaming response.
pub struct UpstreamProducer {
    fragments: FragmentStream,
}

impl UpstreamProducer {
    pub fn from_response(response: Response) -> Self {
        Self {
            fragments: Box::pin(fragment_stream(response)),
        }
    }
}

#[async_trait]
impl ResponseProducer for UpstreamProducer {
    fn name(&self) -> &str {
        KIND
    }

    async fn next(&mut self) -> Result<Option<String>> {
        self.fragments.next().await.transpose()
    }
}

fn fragment_stream(response: Response) -> impl Stream<Item = Result<String>> + Send {
    async_stream::stream! {
        let mut bytes = response.bytes_stream();
        let mut decoder = FrameDecoder::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(StreamError::Producer(format!("Upstream stream error: {}", e)));
                    return;
                }
            };
            decoder.push(&chunk);

            while let Some(data) = decoder.next_payload() {
                if data.trim() == DONE_MARKER {
                    return;
                }

                let parsed: CompletionChunk = match serde_json::from_str(&data) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        debug!(error = %e, "Skipping unparsable upstream record");
                        continue;
                    }
                };

                if let Some(error) = parsed.error {
                    yield Err(StreamError::Producer(error.message));
                    return;
                }

                for choice in parsed.choices {
                    if let Some(content) = choice.delta.content
                        && !content.is_empty()
                    {
                        yield Ok(content);
                    }
                }
            }
        }

        debug!("Upstream closed without [DONE]");
    }
}

/// Builds [`UpstreamProducer`]s against one OpenAI-compatible endpoint.
pub struct UpstreamFactory {
    config: UpstreamConfig,
    client: Client,
    api_key: Option<String>,
    breaker: CircuitBreaker,
}

impl UpstreamFactory {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(StreamError::Config("upstream base_url is empty".to_string()));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()?;
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            warn!(
                env = %config.api_key_env,
                "No upstream API key set, sending unauthenticated requests"
            );
        }
        let breaker = CircuitBreaker::new(&config.circuit_breaker);

        info!(base_url = %config.base_url, model = %config.model, "Upstream producer configured");
        Ok(Self {
            config,
            client,
            api_key,
            breaker,
        })
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(prompt) = &self.config.system_prompt {
            messages.push(json!({ "role": "system", "content": prompt }));
        }
        messages.push(json!({ "role": "user", "content": request.message }));

        json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": true,
        })
    }

    async fn open(&self, body: &serde_json::Value) -> Result<Response> {
        let mut builder = self
            .client
            .post(self.endpoint("chat/completions"))
            .header("Accept", "text/event-stream")
            .json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(response_to_error(response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl ProducerFactory for UpstreamFactory {
    fn kind(&self) -> &str {
        KIND
    }

    async fn create(&self, request: &ChatRequest) -> Result<Box<dyn ResponseProducer>> {
        let body = self.request_body(request);
        let response = self
            .breaker
            .call(|| self.config.retry.run(KIND, || self.open(&body)))
            .await?;
        Ok(Box::new(UpstreamProducer::from_response(response)))
    }

    async fn readiness(&self) -> ReadinessReport {
        let circuit = self.breaker.state();

        let mut probe = self
            .client
            .get(self.endpoint("models"))
            .timeout(Duration::from_millis(self.config.probe_timeout_ms));
        if let Some(key) = &self.api_key {
            probe = probe.bearer_auth(key);
        }

        let upstream = match probe.send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(format!("HTTP {}", response.status().as_u16())),
            Err(e) => Err(format!("unreachable: {}", e)),
        };

        let ready = upstream.is_ok() && circuit != CircuitState::Open;
        ReadinessReport::new(ready)
            .with_check("producer", KIND)
            .with_check(
                "upstream",
                upstream.map_or_else(|e| e, |_| "healthy".to_string()),
            )
            .with_check("circuit", circuit.as_str())
    }
}

fn parse_retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}

async fn response_to_error(response: Response) -> StreamError {
    let status = response.status().as_u16();
    let retry_after_secs = parse_retry_after(&response);
    let body = response.text().await.unwrap_or_default();

    let message = if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated]", &body[..end])
    } else {
        body
    };

    StreamError::UpstreamHttp {
        status,
        message,
        retry_after_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> UpstreamConfig {
        UpstreamConfig {
            base_url: server.uri(),
            api_key_env: "AION_TEST_UNSET_UPSTREAM_KEY".to_string(),
            retry: RetryPolicy {
                max_retries: 1,
                initial_delay_ms: 1,
                ..RetryPolicy::default()
            },
            ..UpstreamConfig::default()
        }
    }

    fn sse_body(records: &[&str]) -> String {
        records
            .iter()
            .map(|record| format!("data: {record}\n\n"))
            .collect()
    }

    async fn drain(producer: &mut Box<dyn ResponseProducer>) -> Result<Vec<String>> {
        let mut out = Vec::new();
        while let Some(fragment) = producer.next().await? {
            out.push(fragment);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn streams_delta_content() {
        let server = MockServer::start().await;
        let body = sse_body(&[
            r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hello"}}]}"#,
            r#"{"choices":[{"delta":{"content":""}}]}"#,
            r#"{"choices":[{"delta":{"content":"there"}}]}"#,
            "[DONE]",
        ]);
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({ "stream": true, "model": "gpt-4o-mini" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .expect(1)
            .mount(&server)
            .await;

        let factory = UpstreamFactory::new(config_for(&server)).unwrap();
        let mut producer = factory.create(&ChatRequest::new("hi")).await.unwrap();
        assert_eq!(drain(&mut producer).await.unwrap(), vec!["Hello", "there"]);
    }

    #[tokio::test]
    async fn in_band_error_record_fails_the_producer() {
        let server = MockServer::start().await;
        let body = sse_body(&[
            r#"{"choices":[{"delta":{"content":"partial"}}]}"#,
            r#"{"error":{"message":"model overloaded"}}"#,
        ]);
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let factory = UpstreamFactory::new(config_for(&server)).unwrap();
        let mut producer = factory.create(&ChatRequest::new("hi")).await.unwrap();
        assert_eq!(producer.next().await.unwrap().as_deref(), Some("partial"));
        let err = producer.next().await.unwrap_err();
        assert_eq!(err.to_string(), "model overloaded");
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(2)
            .mount(&server)
            .await;

        let factory = UpstreamFactory::new(config_for(&server)).unwrap();
        let err = match factory.create(&ChatRequest::new("hi")).await {
            Ok(_) => panic!("expected upstream failure"),
            Err(err) => err,
        };
        assert!(matches!(err, StreamError::UpstreamHttp { status: 503, .. }));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let factory = UpstreamFactory::new(config_for(&server)).unwrap();
        assert!(factory.create(&ChatRequest::new("hi")).await.is_err());
    }

    #[tokio::test]
    async fn circuit_opens_after_repeated_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut config = config_for(&server);
        config.retry = RetryPolicy::none();
        config.circuit_breaker = CircuitBreakerConfig {
            failure_threshold: 2,
            reset_after_ms: 60_000,
        };
        let factory = UpstreamFactory::new(config).unwrap();

        for _ in 0..2 {
            assert!(factory.create(&ChatRequest::new("hi")).await.is_err());
        }
        assert_eq!(factory.circuit_state(), CircuitState::Open);
        let err = match factory.create(&ChatRequest::new("hi")).await {
            Ok(_) => panic!("expected open circuit"),
            Err(err) => err,
        };
        assert!(matches!(err, StreamError::CircuitOpen));
    }

    #[tokio::test]
    async fn readiness_probes_models_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
            .mount(&server)
            .await;

        let factory = UpstreamFactory::new(config_for(&server)).unwrap();
        let report = factory.readiness().await;
        assert!(report.ready);
        assert_eq!(report.checks["upstream"], "healthy");
        assert_eq!(report.checks["circuit"], "closed");
    }

    #[tokio::test]
    async fn readiness_reports_failing_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let factory = UpstreamFactory::new(config_for(&server)).unwrap();
        let report = factory.readiness().await;
        assert!(!report.ready);
        assert_eq!(report.checks["upstream"], "HTTP 502");
    }

    #[test]
    fn rejects_empty_base_url() {
        let config = UpstreamConfig {
            base_url: "  ".to_string(),
            ..UpstreamConfig::default()
        };
        assert!(matches!(
            UpstreamFactory::new(config),
            Err(StreamError::Config(_))
        ));
    }
}
