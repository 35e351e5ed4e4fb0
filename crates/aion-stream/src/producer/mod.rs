//! Response producers - pluggable sources of content fragments

mod upstream;
mod word_splitter;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::request::ChatRequest;

pub use upstream::{UpstreamConfig, UpstreamFactory, UpstreamProducer};
pub use word_splitter::{WordSplitterConfig, WordSplitterFactory, WordSplitterProducer};

/// A lazy, finite sequence of content fragments for one request.
///
/// Each request gets a fresh instance. `next` may suspend for upstream
/// latency; the caller cancels an in-flight call by dropping its future and
/// never calls `next` again afterwards.
#[async_trait]
pub trait ResponseProducer: Send {
    fn name(&self) -> &str;

    /// The next fragment, or `None` once the sequence has ended.
    async fn next(&mut self) -> Result<Option<String>>;

    /// Whether the sequence ended early because of the producer's own ceiling.
    fn truncated(&self) -> bool {
        false
    }

    /// Whether more fragments may follow. Producers that cannot tell
    /// without pulling answer `true`.
    fn has_pending(&self) -> bool {
        true
    }
}

/// Builds producers for incoming requests and reports upstream health.
#[async_trait]
pub trait ProducerFactory: Send + Sync {
    fn kind(&self) -> &str;

    /// Construct the producer for `request`. Failures here happen before any
    /// response bytes are sent.
    async fn create(&self, request: &ChatRequest) -> Result<Box<dyn ResponseProducer>>;

    async fn readiness(&self) -> ReadinessReport;
}

/// Dependency health as reported by a producer factory.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReadinessReport {
    pub ready: bool,
    pub checks: BTreeMap<String, String>,
}

impl ReadinessReport {
    pub fn new(ready: bool) -> Self {
        Self {
            ready,
            checks: BTreeMap::new(),
        }
    }

    pub fn with_check(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.checks.insert(name.into(), value.into());
        self
    }
}

/// Producer selection, as read from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProducerSettings {
    WordSplitter(WordSplitterConfig),
    Upstream(UpstreamConfig),
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self::WordSplitter(WordSplitterConfig::default())
    }
}

impl ProducerSettings {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WordSplitter(_) => word_splitter::KIND,
            Self::Upstream(_) => upstream::KIND,
        }
    }
}

/// Instantiate the factory selected by `settings`.
pub fn build_factory(settings: &ProducerSettings) -> Result<Arc<dyn ProducerFactory>> {
    let factory: Arc<dyn ProducerFactory> = match settings {
        ProducerSettings::WordSplitter(config) => {
            Arc::new(WordSplitterFactory::new(config.clone()))
        }
        ProducerSettings::Upstream(config) => Arc::new(UpstreamFactory::new(config.clone())?),
    };
    Ok(factory)
}
