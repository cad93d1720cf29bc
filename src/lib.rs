//! keygate
//!
//! Request-admission layer for a multi-tenant API gateway: authenticates
//! every inbound request by API key or session token, checks scopes, and
//! throttles callers under tiered fixed-window rate limits.
//!
//! ## Modules
//!
//! - [`auth`] - API key codec and resolution, session tokens, scope gate,
//!   authentication middleware
//! - [`rate_limit`] - Fixed-window counters, tier selection, throttling
//!   middleware
//! - [`infra`] - Credential cache, in-memory key store, shutdown handling
//! - [`api`] - Error responses and the identity routes
//! - [`server`] - Configuration and HTTP bootstrap

pub mod api;
pub mod auth;
pub mod infra;
pub mod rate_limit;
pub mod server;

// Re-export commonly used types
pub use auth::{
    ApiKeyRecord, ApiKeyStore, AuthContext, AuthError, AuthType, Authenticator,
    CredentialResolver, SessionContext, SessionValidator,
};
pub use infra::CredentialCache;
pub use rate_limit::{RateLimitConfig, RateLimiter, WindowStore};
