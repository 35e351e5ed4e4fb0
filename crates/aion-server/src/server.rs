use std::future::Future;
use std::net::SocketAddr;

use anyhow::Result;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::info;

use crate::api::{chat, health};
use crate::config::ServerConfig;
use crate::error::panic_response;
use crate::lifecycle::{LifecycleHooks, ServerInfo};
use crate::middleware::{RateLimiter, rate_limit_middleware, request_log};
use crate::state::AppState;

/// Build the router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let mut api = Router::new().route("/api/v1/chat", post(chat::chat));
    if let Some(limiter) = RateLimiter::new(config.chat_rate_limit_per_minute) {
        api = api.route_layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ));
    }
    // Probes stay outside the general limiter.
    if let Some(limiter) = RateLimiter::new(config.rate_limit_per_minute) {
        api = api.route_layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ));
    }

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/status", get(health::status))
        .merge(api)
        .fallback(health::not_found)
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn(request_log))
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves. In-flight streams are
/// cancelled when it does, then the server drains.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    hooks: LifecycleHooks,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let info = ServerInfo {
        addr: listener.local_addr()?,
        environment: state.config.environment.clone(),
        producer: state.producers.kind().to_string(),
        version: env!("CARGO_PKG_VERSION"),
    };
    let streams = state.shutdown.clone();
    let app = build_router(state);

    hooks.started(&info);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        info!("Shutting down, cancelling active streams");
        streams.cancel();
    })
    .await?;
    hooks.stopped(&info);

    Ok(())
}

/// Bind the configured address and serve until SIGINT or SIGTERM.
pub async fn run(config: ServerConfig, hooks: LifecycleHooks) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config)?;
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|err| anyhow::anyhow!("Failed to bind {}: {}", addr, err))?;
    serve(listener, state, hooks, shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
