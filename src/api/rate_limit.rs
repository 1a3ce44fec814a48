//! Per-IP token-bucket rate limiting middleware for the client port.
//!
//! One bucket per client IP. Tokens refill steadily at `rpm / 60` tokens/second
//! and the burst cap is `ceil(rpm / 2)` — enough to absorb short spikes without
//! allowing runaway bursts. Disabled when `gateway.client_rpm` is unset.
//!
//! Distinct from [`crate::gateway::rate_limiter::RateLimiter`]: that limiter
//! is the process-wide QPS/TPM admission gate in front of the Provider; this
//! one is a per-caller-IP guard in front of the HTTP surface itself.
//!
//! When a request is rejected the response includes:
//! - `429 Too Many Requests`
//! - `Retry-After: <seconds>` — exact wait before the bucket has a token again
//! - `X-RateLimit-Limit: <rpm>` — configured limit
//! - `X-RateLimit-Policy: <N>;w=60` — standard hint: N requests per 60-second window

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Instant,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

use crate::gateway::GatewayState;

/// Per-IP token bucket state.
#[derive(Debug, Clone)]
struct Bucket {
    last_refill: Instant,
    tokens: f64,
}

/// Shared rate limiter: one token bucket per client IP address.
pub struct IpRateLimiter {
    pub rpm: u32,
    fill_rate: f64,
    capacity: f64,
    buckets: DashMap<IpAddr, Bucket>,
}

impl IpRateLimiter {
    pub fn new(rpm: u32) -> Self {
        let capacity = ((rpm + 1) / 2) as f64;
        let fill_rate = rpm as f64 / 60.0;
        Self {
            rpm,
            fill_rate,
            capacity,
            buckets: DashMap::new(),
        }
    }

    /// Attempt to consume one token for `ip`. `Err(retry_after_secs)` when exhausted.
    pub fn check(&self, ip: IpAddr) -> Result<(), f64> {
        let now = Instant::now();

        let mut bucket = self.buckets.entry(ip).or_insert_with(|| Bucket {
            last_refill: now,
            tokens: self.capacity,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        let new_tokens = (bucket.tokens + elapsed * self.fill_rate).min(self.capacity);

        if new_tokens < 1.0 {
            let retry_after = (1.0 - new_tokens) / self.fill_rate;
            return Err(retry_after.ceil());
        }

        bucket.last_refill = now;
        bucket.tokens = new_tokens - 1.0;
        Ok(())
    }
}

/// Axum middleware that enforces per-IP rate limits on the client port.
///
/// No-ops (passes through) when `gateway.client_rpm` is unset. Falls back to
/// `127.0.0.1` if `ConnectInfo` is unavailable (e.g., in tests).
pub async fn rate_limit_middleware(State(state): State<Arc<GatewayState>>, req: Request, next: Next) -> Response {
    let Some(limiter) = state.ip_rate_limiter() else {
        return next.run(req).await;
    };

    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip())
        .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));

    if let Err(retry_after) = limiter.check(ip) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [
                ("retry-after", retry_after.to_string()),
                ("x-ratelimit-limit", limiter.rpm.to_string()),
                ("x-ratelimit-policy", format!("{};w=60", limiter.rpm)),
                ("content-type", "text/plain".into()),
            ],
            "Rate limit exceeded. Please retry after the indicated delay.",
        )
            .into_response();
    }

    next.run(req).await
}
