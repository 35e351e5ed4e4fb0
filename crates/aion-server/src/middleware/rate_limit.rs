use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::ApiError;

/// Clients tracked before idle entries are swept.
const SWEEP_THRESHOLD: usize = 10_000;

/// Sliding-window limiter keyed by client address.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<RateLimitState>>,
}

struct RateLimitState {
    limit: u64,
    window: Duration,
    hits: HashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit_per_minute: Option<u64>) -> Option<Self> {
        limit_per_minute.map(|limit| Self::with_window(limit, Duration::from_secs(60)))
    }

    pub fn with_window(limit: u64, window: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(RateLimitState {
                limit,
                window,
                hits: HashMap::new(),
            })),
        }
    }

    /// Record a hit for `client`, or return how long until it may retry.
    fn check(&self, client: &str) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let window = state.window;
        let limit = state.limit;

        if state.hits.len() > SWEEP_THRESHOLD {
            state.hits.retain(|_, hits| {
                hits.back()
                    .is_some_and(|last| now.duration_since(*last) <= window)
            });
        }

        let hits = state.hits.entry(client.to_string()).or_default();
        while let Some(front) = hits.front() {
            if now.duration_since(*front) > window {
                hits.pop_front();
            } else {
                break;
            }
        }

        if hits.len() as u64 >= limit {
            let oldest = hits.front().copied().unwrap_or(now);
            return Err(window.saturating_sub(now.duration_since(oldest)));
        }

        hits.push_back(now);
        Ok(())
    }
}

/// Client identity: first `X-Forwarded-For` hop, else the peer address.
pub fn client_key(req: &Request) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return forwarded.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    let client = client_key(&req);
    if let Err(retry_after) = limiter.check(&client) {
        tracing::warn!(
            client = %client,
            path = %req.uri().path(),
            "Rate limit exceeded"
        );
        return ApiError::too_many_requests(retry_after.as_secs().max(1)).into_response();
    }

    next.run(req).await
}
