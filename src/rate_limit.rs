//! Rate limiting for the login endpoint.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down password guessing.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};

use crate::api::ApiError;
use crate::auth::{ServerSettings, extract_client_ip};

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Bucket key used when the client IP cannot be determined.
const UNKNOWN_CLIENT: &str = "unknown";

/// Rate limiting for `POST /auth/login`.
#[derive(Clone)]
pub struct LoginRateLimit {
    limiter: Arc<IpLimiter>,
    settings: ServerSettings,
}

impl LoginRateLimit {
    /// Allow `per_minute` attempts per client IP, with the same burst size.
    pub fn new(per_minute: NonZeroU32, settings: ServerSettings) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))),
            settings,
        }
    }

    fn check(&self, ip: &str) -> bool {
        self.limiter.check_key(&ip.to_string()).is_ok()
    }
}

/// Middleware for rate limiting login attempts.
pub async fn rate_limit_login(
    State(config): State<LoginRateLimit>,
    request: Request,
    next: Next,
) -> Response {
    let ip = extract_client_ip(&request, config.settings.ip_header.as_ref())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

    if config.check(&ip) {
        next.run(request).await
    } else {
        tracing::warn!(ip = %ip, "Login rate limit exceeded");
        ApiError::too_many_requests("Too many login attempts. Please wait before trying again.")
            .into_response()
    }
}
