//! Deterministic stand-in producer: streams the message back word by word.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ProducerFactory, ReadinessReport, ResponseProducer};
use crate::error::Result;
use crate::request::ChatRequest;

pub(super) const KIND: &str = "word_splitter";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WordSplitterConfig {
    /// Pause between consecutive fragments.
    pub fragment_delay_ms: u64,
    /// Hard ceiling on fragments per request.
    pub max_fragments: usize,
}

impl Default for WordSplitterConfig {
    fn default() -> Self {
        Self {
            fragment_delay_ms: 50,
            max_fragments: 200,
        }
    }
}

/// Yields the whitespace-delimited tokens of a message.
#[derive(Debug)]
pub struct WordSplitterProducer {
    tokens: Vec<String>,
    cursor: usize,
    delay: Duration,
    truncated: bool,
}

impl WordSplitterProducer {
    pub fn new(message: &str, delay: Duration, max_fragments: usize) -> Self {
        let mut tokens: Vec<String> = message.split_whitespace().map(str::to_string).collect();
        let truncated = tokens.len() > max_fragments;
        if truncated {
            debug!(
                tokens = tokens.len(),
                max_fragments, "Message exceeds fragment ceiling"
            );
            tokens.truncate(max_fragments);
        }

        Self {
            tokens,
            cursor: 0,
            delay,
            truncated,
        }
    }

    pub fn remaining(&self) -> usize {
        self.tokens.len() - self.cursor
    }
}

#[async_trait]
impl ResponseProducer for WordSplitterProducer {
    fn name(&self) -> &str {
        KIND
    }

    async fn next(&mut self) -> Result<Option<String>> {
        if self.cursor >= self.tokens.len() {
            return Ok(None);
        }
        if self.cursor > 0 && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let token = std::mem::take(&mut self.tokens[self.cursor]);
        self.cursor += 1;
        Ok(Some(token))
    }

    fn truncated(&self) -> bool {
        self.truncated
    }

    fn has_pending(&self) -> bool {
        self.remaining() > 0
    }
}

pub struct WordSplitterFactory {
    config: WordSplitterConfig,
}

impl WordSplitterFactory {
    pub fn new(config: WordSplitterConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ProducerFactory for WordSplitterFactory {
    fn kind(&self) -> &str {
        KIND
    }

    async fn create(&self, request: &ChatRequest) -> Result<Box<dyn ResponseProducer>> {
        Ok(Box::new(WordSplitterProducer::new(
            &request.message,
            Duration::from_millis(self.config.fragment_delay_ms),
            self.config.max_fragments,
        )))
    }

    async fn readiness(&self) -> ReadinessReport {
        ReadinessReport::new(true)
            .with_check("producer", KIND)
            .with_check("upstream", "not_required")
    }
}
