//! Authentication middleware for Axum
//!
//! Extracts credentials from requests and publishes the resulting identity
//! as request extensions. Required variants reject before the handler runs;
//! optional variants never reject.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE},
        HeaderMap,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::{
    is_valid_format, AuthContext, AuthError, CredentialResolver, SessionContext, SessionValidator,
};
use crate::api::ApiError;

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Cookie carrying the session token unless configured otherwise
pub const DEFAULT_SESSION_COOKIE: &str = "session_token";

/// Authenticator for API keys and session tokens
pub struct Authenticator {
    resolver: Arc<CredentialResolver>,
    root_key: Option<SecretString>,
    sessions: Option<Arc<SessionValidator>>,
    session_cookie: String,
}

impl Authenticator {
    pub fn new(resolver: Arc<CredentialResolver>) -> Self {
        Self {
            resolver,
            root_key: None,
            sessions: None,
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
        }
    }

    /// Accept `key` as the root key. Empty keys are ignored.
    pub fn with_root_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !key.is_empty() {
            self.root_key = Some(SecretString::from(key));
        }
        self
    }

    pub fn with_sessions(mut self, validator: Arc<SessionValidator>) -> Self {
        self.sessions = Some(validator);
        self
    }

    pub fn with_session_cookie(mut self, name: impl Into<String>) -> Self {
        self.session_cookie = name.into();
        self
    }

    pub fn session_cookie(&self) -> &str {
        &self.session_cookie
    }

    /// Compare against the root key without early exit on the first
    /// differing byte
    pub fn is_root_key(&self, provided: &str) -> bool {
        match &self.root_key {
            Some(secret) => secret
                .expose_secret()
                .as_bytes()
                .ct_eq(provided.as_bytes())
                .into(),
            None => false,
        }
    }

    /// Authenticate an API key
    pub async fn authenticate_api_key(&self, key: Option<&str>) -> Result<AuthContext, AuthError> {
        let key = key.filter(|k| !k.is_empty()).ok_or(AuthError::MissingAuth)?;

        if self.is_root_key(key) {
            return Ok(AuthContext::root());
        }

        if !is_valid_format(key) {
            return Err(AuthError::InvalidFormat);
        }

        let record = self.resolver.resolve(key).await?;
        Ok(AuthContext::from_record(&record))
    }

    /// Verify a session token
    pub fn authenticate_session(&self, token: Option<&str>) -> Result<SessionContext, AuthError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingSession)?;

        let validator = self
            .sessions
            .as_ref()
            .ok_or_else(|| AuthError::InvalidSession("sessions not configured".to_string()))?;

        validator.verify(token).map(SessionContext::from)
    }
}

/// API key from `x-api-key`, falling back to `Authorization: ApiKey <key>`
pub fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key.trim());
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("ApiKey "))
        .map(str::trim)
}

/// Session token from the named cookie, falling back to a bearer header
pub fn extract_session_token<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    let from_cookie = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value);

    if from_cookie.is_some() {
        return from_cookie;
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Reject requests without a valid API key
pub async fn require_api_key(
    State(authenticator): State<Arc<Authenticator>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let result = authenticator
        .authenticate_api_key(extract_api_key(request.headers()))
        .await;

    match result {
        Ok(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Publish an API-key identity when one resolves; never reject
pub async fn optional_api_key(
    State(authenticator): State<Arc<Authenticator>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let result = authenticator
        .authenticate_api_key(extract_api_key(request.headers()))
        .await;

    match result {
        Ok(context) => {
            request.extensions_mut().insert(context);
        }
        Err(e) => debug!(error = %e, "optional API key authentication skipped"),
    }

    next.run(request).await
}

/// Reject requests without a valid session token
pub async fn require_session(
    State(authenticator): State<Arc<Authenticator>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = extract_session_token(request.headers(), authenticator.session_cookie());

    match authenticator.authenticate_session(token) {
        Ok(session) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Publish a session identity when the token verifies; never reject
pub async fn optional_session(
    State(authenticator): State<Arc<Authenticator>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = extract_session_token(request.headers(), authenticator.session_cookie());

    match authenticator.authenticate_session(token) {
        Ok(session) => {
            request.extensions_mut().insert(session);
        }
        Err(e) => debug!(error = %e, "optional session authentication skipped"),
    }

    next.run(request).await
}

/// Require both an API key (the calling application) and a session (the
/// acting user). The key is checked first.
pub async fn require_api_key_and_session(
    State(authenticator): State<Arc<Authenticator>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let context = match authenticator
        .authenticate_api_key(extract_api_key(request.headers()))
        .await
    {
        Ok(context) => context,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let token = extract_session_token(request.headers(), authenticator.session_cookie());
    let session = match authenticator.authenticate_session(token) {
        Ok(session) => session,
        Err(e) => return ApiError::from(e).into_response(),
    };

    request.extensions_mut().insert(context);
    request.extensions_mut().insert(session);
    next.run(request).await
}
