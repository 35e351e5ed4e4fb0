use std::sync::Arc;
use std::time::Instant;

use aion_stream::{CancellationToken, ProducerFactory, build_factory};

use crate::config::ServerConfig;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub producers: Arc<dyn ProducerFactory>,
    /// Cancelled once the server begins shutting down; every stream holds a
    /// child token.
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig) -> aion_stream::Result<Self> {
        let producers = build_factory(&config.producer)?;
        Ok(Self::with_factory(config, producers))
    }

    pub fn with_factory(config: ServerConfig, producers: Arc<dyn ProducerFactory>) -> Self {
        Self {
            config: Arc::new(config),
            producers,
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }
}
