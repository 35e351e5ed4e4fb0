//! AION HTTP gateway
//!
//! Accepts chat messages and streams the response back as Server-Sent
//! Events, using the pipeline from `aion-stream`.

pub mod api;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod middleware;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::ApiError;
pub use lifecycle::{LifecycleHooks, ServerInfo};
pub use server::{build_router, run, serve};
pub use state::AppState;
