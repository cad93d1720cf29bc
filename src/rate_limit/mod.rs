//! Tiered fixed-window rate limiting
//!
//! Each caller gets a counter per window. A request is admitted only if its
//! window has room; the slot is reserved before the handler runs and, when
//! the [`CountPolicy`] excludes the response's outcome, refunded afterwards.
//!
//! Reserved slots count against the cap while their requests are in flight.
//! Under [`CountPolicy::SkipSuccessful`] a burst of `max_requests` concurrent
//! requests can exhaust the window and cause 429s, even though none of them
//! is counted once it succeeds.
//!
//! Counters live in process memory. Instances behind a load balancer each
//! enforce their own budget.
//!
//! # Response Headers
//!
//! - `X-RateLimit-Limit`: the tier's cap
//! - `X-RateLimit-Remaining`: budget left after this request
//! - `X-RateLimit-Reset`: window close, Unix seconds
//! - `Retry-After`: on 429 only, the window length in seconds

mod policy;
mod store;

pub use policy::*;
pub use store::*;

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::api::ApiError;
use crate::auth::{AuthContext, AuthError, SessionContext};

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// A reserved slot, settled once the response status is known
#[derive(Debug, Clone)]
pub struct Admission {
    pub key: String,
    pub limit: u64,
    pub window: WindowSnapshot,
}

impl Admission {
    pub fn remaining(&self) -> u64 {
        self.window.remaining(self.limit)
    }
}

/// Fixed-window limiter parameterized by tier
pub struct RateLimiter {
    store: Arc<WindowStore>,
    config: RateLimitConfig,
    key_extractor: KeyExtractor,
}

impl RateLimiter {
    pub fn new(store: Arc<WindowStore>, config: RateLimitConfig) -> Self {
        Self {
            store,
            config,
            key_extractor: Arc::new(default_key),
        }
    }

    /// Replace caller identification
    pub fn with_key_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.key_extractor = Arc::new(extractor);
        self
    }

    pub fn store(&self) -> &Arc<WindowStore> {
        &self.store
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Tier for the identities published on `request`
    pub fn tier_for(&self, request: &Request) -> TierPolicy {
        let auth = request.extensions().get::<AuthContext>();
        let session = request.extensions().get::<SessionContext>();
        let kind = PrincipalKind::of(auth, session);
        let scopes = auth.map(|a| a.scopes.clone()).unwrap_or_else(BTreeSet::new);

        self.config.select_tier(kind, &scopes)
    }

    /// Window key for `request` under `tier`
    pub fn key_for(&self, request: &Request, tier: &TierPolicy) -> String {
        format!("{}:{}", tier.name, (self.key_extractor)(request))
    }

    /// Reserve a slot or reject
    pub fn acquire(
        &self,
        key: &str,
        tier: &TierPolicy,
    ) -> Result<Admission, (AuthError, WindowSnapshot)> {
        match self.store.try_acquire(key, tier.window, tier.max_requests) {
            Ok(window) => Ok(Admission {
                key: key.to_string(),
                limit: tier.max_requests,
                window,
            }),
            Err(window) => Err((
                AuthError::RateLimited {
                    retry_after: tier.retry_after_secs(),
                    message: tier.message.clone(),
                },
                window,
            )),
        }
    }

    /// Keep or refund the reserved slot and return the current window
    pub fn settle(&self, admission: &Admission, status: StatusCode) -> WindowSnapshot {
        if !self.config.count_policy.counts(status) {
            self.store.release(&admission.key, admission.window.reset_at);
        }
        self.store.get(&admission.key).unwrap_or(admission.window)
    }
}

fn set_headers(headers: &mut HeaderMap, limit: u64, remaining: u64, reset_unix: i64) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(reset_unix));
}

/// Throttle requests by the caller's tier
///
/// Layer this inside the authentication middleware so the published
/// identity is visible here.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let tier = limiter.tier_for(&request);
    let key = limiter.key_for(&request, &tier);

    let admission = match limiter.acquire(&key, &tier) {
        Ok(admission) => admission,
        Err((error, window)) => {
            warn!(key = %key, tier = tier.name, limit = tier.max_requests, "rate limit exceeded");
            let mut response = ApiError::from(error).into_response();
            set_headers(
                response.headers_mut(),
                tier.max_requests,
                0,
                window.reset_unix_secs(),
            );
            return response;
        }
    };

    let mut response = next.run(request).await;

    let window = limiter.settle(&admission, response.status());
    set_headers(
        response.headers_mut(),
        admission.limit,
        window.remaining(admission.limit),
        window.reset_unix_secs(),
    );

    response
}
