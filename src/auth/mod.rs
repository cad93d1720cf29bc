//! Authentication and authorization for the admission layer
//!
//! Every inbound request is identified before it reaches a handler. Two
//! credential kinds are supported and can be combined on one route.
//!
//! # Authentication Methods
//!
//! - **API Keys**: `gk_`-prefixed secrets, SHA-256 hashed, looked up by a
//!   short prefix plus the full digest and cached for a bounded TTL
//! - **Session Tokens**: HMAC-signed JWTs identifying the acting human,
//!   verified by signature only (no server-side session record)
//! - **Root Key**: an out-of-band secret from the environment that bypasses
//!   the store and grants every scope
//!
//! # Authorization Model
//!
//! A credential carries a set of scope strings. Routes demand scopes through
//! [`require_scopes`]; `admin` and `root` satisfy any demand.
//!
//! # Published Identity
//!
//! Successful authentication inserts [`AuthContext`] (API key) and/or
//! [`SessionContext`] (session token) into the request extensions.

mod api_key;
mod jwt;
mod middleware;
mod resolver;
mod scopes;

pub use api_key::*;
pub use jwt::*;
pub use middleware::*;
pub use resolver::*;
pub use scopes::*;

use std::collections::BTreeSet;

use serde::Serialize;
use uuid::Uuid;

/// Scope granting read access
pub const SCOPE_READ: &str = "read";
/// Scope granting write access
pub const SCOPE_WRITE: &str = "write";
/// Administrative scope; satisfies every scope check
pub const SCOPE_ADMIN: &str = "admin";
/// Root marker; only the root key carries it
pub const SCOPE_ROOT: &str = "root";

/// Scopes assigned to a stored key that has none recorded
pub fn default_scopes() -> BTreeSet<String> {
    [SCOPE_READ, SCOPE_WRITE]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Scopes granted to the root key
pub fn root_scopes() -> BTreeSet<String> {
    [SCOPE_READ, SCOPE_WRITE, SCOPE_ADMIN, SCOPE_ROOT]
        .into_iter()
        .map(String::from)
        .collect()
}

/// `admin` or `root` present; such a set satisfies every scope demand
pub fn is_elevated(scopes: &BTreeSet<String>) -> bool {
    scopes.contains(SCOPE_ADMIN) || scopes.contains(SCOPE_ROOT)
}

/// How the API-key identity was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// Root key from process configuration
    Root,
    /// Key record resolved from the store
    Stored,
    /// No API key identity
    None,
}

/// Identity published by API-key authentication
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    /// Credential (API key record) ID
    pub credential_id: Uuid,

    /// Account the credential acts on behalf of
    pub owner_id: Uuid,

    /// Granted scopes
    pub scopes: BTreeSet<String>,

    /// Root bypass or stored credential
    pub auth_type: AuthType,

    /// Display label of the calling application
    pub client_name: Option<String>,
}

impl AuthContext {
    /// Identity for the root key. Uses the nil UUID for both IDs.
    pub fn root() -> Self {
        Self {
            credential_id: Uuid::nil(),
            owner_id: Uuid::nil(),
            scopes: root_scopes(),
            auth_type: AuthType::Root,
            client_name: None,
        }
    }

    /// Identity for a resolved key record
    pub fn from_record(record: &ApiKeyRecord) -> Self {
        Self {
            credential_id: record.id,
            owner_id: record.owner_id,
            scopes: record.scopes.clone(),
            auth_type: AuthType::Stored,
            client_name: record.client_name.clone(),
        }
    }
}

/// Identity published by session-token authentication
#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    pub session_user_id: String,
    pub user_address: Option<String>,
    pub client_id: Option<String>,
    pub client_name: Option<String>,
}

/// Authentication error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing authentication")]
    MissingAuth,

    #[error("malformed API key")]
    InvalidFormat,

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("missing session token")]
    MissingSession,

    #[error("invalid session token: {0}")]
    InvalidSession(String),

    #[error("session token expired")]
    SessionExpired,

    #[error("insufficient scope")]
    InsufficientScope {
        required: Vec<String>,
        available: Vec<String>,
    },

    #[error("rate limit exceeded")]
    RateLimited { retry_after: u64, message: String },
}
