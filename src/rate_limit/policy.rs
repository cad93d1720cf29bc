//! Rate limit tiers and caller identification
//!
//! Tiers are parameters for one fixed-window limiter, selected per request
//! from the published identity.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;

use crate::auth::{is_elevated, AuthContext, AuthType, SessionContext};

/// Header consulted for the client IP
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Key used when nothing identifies the caller
pub const UNKNOWN_CALLER: &str = "unknown";

const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";
const ANONYMOUS_MESSAGE: &str = "Too many requests. Authenticate for higher rate limits.";

/// Who is calling, as far as throttling is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalKind {
    Root,
    ApiKey,
    Session,
    Anonymous,
}

impl PrincipalKind {
    /// Classify from the published identities; an API key outranks a session
    pub fn of(auth: Option<&AuthContext>, session: Option<&SessionContext>) -> Self {
        match (auth, session) {
            (Some(ctx), _) if ctx.auth_type == AuthType::Root => PrincipalKind::Root,
            (Some(ctx), _) if ctx.auth_type == AuthType::Stored => PrincipalKind::ApiKey,
            (_, Some(_)) => PrincipalKind::Session,
            _ => PrincipalKind::Anonymous,
        }
    }
}

/// Which outcomes consume budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountPolicy {
    /// Every admitted request
    #[default]
    All,
    /// Only responses below 400
    SkipFailed,
    /// Only responses at or above 400
    SkipSuccessful,
}

impl CountPolicy {
    pub fn counts(&self, status: axum::http::StatusCode) -> bool {
        let failed = status.is_client_error() || status.is_server_error();
        match self {
            CountPolicy::All => true,
            CountPolicy::SkipFailed => !failed,
            CountPolicy::SkipSuccessful => failed,
        }
    }
}

impl std::str::FromStr for CountPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(CountPolicy::All),
            "skip_failed" => Ok(CountPolicy::SkipFailed),
            "skip_successful" => Ok(CountPolicy::SkipSuccessful),
            other => Err(format!("unknown count policy: {other}")),
        }
    }
}

/// Throttling parameters for one tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPolicy {
    /// Namespaces the window key so tiers never share a counter
    pub name: &'static str,
    pub window: Duration,
    pub max_requests: u64,
    pub message: String,
}

impl TierPolicy {
    /// Seconds a rejected caller should wait, rounded up
    pub fn retry_after_secs(&self) -> u64 {
        let ms = self.window.as_millis() as u64;
        ms.div_ceil(1000)
    }
}

/// Rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    /// Root key and `admin`/`root`-scoped keys
    pub root_max: u64,
    pub api_key_max: u64,
    pub session_max: u64,
    pub anonymous_max: u64,
    pub count_policy: CountPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            root_max: 10_000,
            api_key_max: 1_000,
            session_max: 300,
            anonymous_max: 60,
            count_policy: CountPolicy::All,
        }
    }
}

impl RateLimitConfig {
    /// Pick the tier for a caller
    pub fn select_tier(&self, kind: PrincipalKind, scopes: &BTreeSet<String>) -> TierPolicy {
        let elevated = is_elevated(scopes);

        let (name, max_requests, message) = match kind {
            PrincipalKind::Root => ("root", self.root_max, DEFAULT_MESSAGE),
            PrincipalKind::ApiKey if elevated => ("root", self.root_max, DEFAULT_MESSAGE),
            PrincipalKind::ApiKey => ("api_key", self.api_key_max, DEFAULT_MESSAGE),
            PrincipalKind::Session => ("session", self.session_max, DEFAULT_MESSAGE),
            PrincipalKind::Anonymous => ("anonymous", self.anonymous_max, ANONYMOUS_MESSAGE),
        };

        TierPolicy {
            name,
            window: self.window,
            max_requests,
            message: message.to_string(),
        }
    }
}

/// Derives the window key for a request
pub type KeyExtractor = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// Principal id, then credential id, then forwarded IP, then `unknown`.
/// The first available signal wins.
pub fn default_key(request: &Request) -> String {
    let auth = request.extensions().get::<AuthContext>();
    let session = request.extensions().get::<SessionContext>();

    if let Some(ctx) = auth.filter(|c| !c.owner_id.is_nil()) {
        return format!("user:{}", ctx.owner_id);
    }
    if let Some(session) = session {
        return format!("user:{}", session.session_user_id);
    }
    if let Some(ctx) = auth {
        return format!("key:{}", ctx.credential_id);
    }

    request
        .headers()
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(|ip| format!("ip:{ip}"))
        .unwrap_or_else(|| UNKNOWN_CALLER.to_string())
}
