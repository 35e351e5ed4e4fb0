use axum::{
    Json,
    extract::State,
    http::{Method, StatusCode, Uri},
};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::ApiError;
use crate::state::AppState;

pub const SERVICE_NAME: &str = "aion-server";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub environment: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub producer: String,
    pub checks: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub environment: String,
    pub uptime_secs: u64,
    pub producer: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub endpoints: BTreeMap<&'static str, &'static str>,
}

/// Liveness. Touches no dependency so it stays fast under streaming load.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.environment.clone(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let report = state.producers.readiness().await;
    let status = if report.ready {
        StatusCode::OK
    } else {
        tracing::warn!(checks = ?report.checks, "Readiness check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadyResponse {
            ready: report.ready,
            producer: state.producers.kind().to_string(),
            checks: report.checks,
        }),
    )
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.environment.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        producer: state.producers.kind().to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

pub async fn root() -> Json<ServiceInfo> {
    let endpoints = BTreeMap::from([
        ("chat", "POST /api/v1/chat"),
        ("health", "GET /health"),
        ("ready", "GET /ready"),
        ("status", "GET /status"),
    ]);
    Json(ServiceInfo {
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        endpoints,
    })
}

pub async fn not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::not_found(format!("Route {} {} not found", method, uri.path()))
}
