//! Startup and shutdown hooks.

use std::net::SocketAddr;

/// What a hook learns about the running server.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub addr: SocketAddr,
    pub environment: String,
    pub producer: String,
    pub version: &'static str,
}

type Hook = Box<dyn Fn(&ServerInfo) + Send + Sync>;

/// Callbacks run once the listener is bound and once the server has drained.
#[derive(Default)]
pub struct LifecycleHooks {
    on_start: Vec<Hook>,
    on_stop: Vec<Hook>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hooks that log startup and shutdown.
    pub fn with_logging() -> Self {
        Self::new()
            .on_start(|info| {
                tracing::info!(
                    addr = %info.addr,
                    environment = %info.environment,
                    producer = %info.producer,
                    version = info.version,
                    "AION server listening on http://{}",
                    info.addr
                );
            })
            .on_stop(|info| {
                tracing::info!(addr = %info.addr, "AION server stopped");
            })
    }

    pub fn on_start(mut self, hook: impl Fn(&ServerInfo) + Send + Sync + 'static) -> Self {
        self.on_start.push(Box::new(hook));
        self
    }

    pub fn on_stop(mut self, hook: impl Fn(&ServerInfo) + Send + Sync + 'static) -> Self {
        self.on_stop.push(Box::new(hook));
        self
    }

    pub(crate) fn started(&self, info: &ServerInfo) {
        self.on_start.iter().for_each(|hook| hook(info));
    }

    pub(crate) fn stopped(&self, info: &ServerInfo) {
        self.on_stop.iter().for_each(|hook| hook(info));
    }
}
