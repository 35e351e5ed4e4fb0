#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use aion_server::{AppState, ServerConfig};
use aion_stream::{
    ChatRequest, ProducerFactory, ProducerSettings, ReadinessReport, ResponseProducer,
    StreamError, WordSplitterConfig,
};
use async_trait::async_trait;

/// Word splitter config with no pacing, so tests finish immediately.
pub fn fast_config() -> ServerConfig {
    ServerConfig {
        producer: ProducerSettings::WordSplitter(WordSplitterConfig {
            fragment_delay_ms: 0,
            max_fragments: 200,
        }),
        ..ServerConfig::default()
    }
}

pub fn fast_state() -> AppState {
    AppState::new(fast_config()).expect("word splitter factory")
}

pub fn state_with(factory: impl ProducerFactory + 'static) -> AppState {
    AppState::with_factory(fast_config(), Arc::new(factory))
}

/// Endless producer that counts every fragment it hands out.
pub struct TickerFactory {
    pub produced: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl TickerFactory {
    pub fn new(delay: Duration) -> Self {
        Self {
            produced: Arc::new(AtomicUsize::new(0)),
            delay,
        }
    }
}

struct TickerProducer {
    produced: Arc<AtomicUsize>,
    delay: Duration,
}

#[async_trait]
impl ResponseProducer for TickerProducer {
    fn name(&self) -> &str {
        "ticker"
    }

    async fn next(&mut self) -> aion_stream::Result<Option<String>> {
        tokio::time::sleep(self.delay).await;
        let n = self.produced.fetch_add(1, Ordering::SeqCst);
        Ok(Some(format!("tick{n}")))
    }
}

#[async_trait]
impl ProducerFactory for TickerFactory {
    fn kind(&self) -> &str {
        "ticker"
    }

    async fn create(&self, _request: &ChatRequest) -> aion_stream::Result<Box<dyn ResponseProducer>> {
        Ok(Box::new(TickerProducer {
            produced: self.produced.clone(),
            delay: self.delay,
        }))
    }

    async fn readiness(&self) -> ReadinessReport {
        ReadinessReport::new(true)
    }
}

/// Factory whose behaviour is chosen per test.
pub enum FaultyFactory {
    FailOnCreate,
    PanicOnCreate,
    PanicMidStream,
    NotReady,
}

struct PanicAfterFirst {
    emitted: bool,
}

#[async_trait]
impl ResponseProducer for PanicAfterFirst {
    fn name(&self) -> &str {
        "panicky"
    }

    async fn next(&mut self) -> aion_stream::Result<Option<String>> {
        if self.emitted {
            panic!("producer exploded");
        }
        self.emitted = true;
        Ok(Some("first".to_string()))
    }
}

#[async_trait]
impl ProducerFactory for FaultyFactory {
    fn kind(&self) -> &str {
        "faulty"
    }

    async fn create(&self, _request: &ChatRequest) -> aion_stream::Result<Box<dyn ResponseProducer>> {
        match self {
            Self::FailOnCreate => Err(StreamError::Producer("upstream unavailable".into())),
            Self::PanicOnCreate => panic!("factory exploded"),
            Self::PanicMidStream => Ok(Box::new(PanicAfterFirst { emitted: false })),
            Self::NotReady => Err(StreamError::CircuitOpen),
        }
    }

    async fn readiness(&self) -> ReadinessReport {
        match self {
            Self::NotReady => ReadinessReport::new(false).with_check("upstream", "unreachable"),
            _ => ReadinessReport::new(true),
        }
    }
}
