//! Scope gate
//!
//! Runs after API-key authentication and checks the published scopes against
//! what the route demands.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::{is_elevated, AuthContext, AuthError};
use crate::api::ApiError;

/// Check `required` against `available`
///
/// `admin` or `root` in `available` passes any demand. Otherwise every
/// required scope must be present.
pub fn check_scopes<S: AsRef<str>>(
    required: &[S],
    available: &BTreeSet<String>,
) -> Result<(), AuthError> {
    if is_elevated(available) {
        return Ok(());
    }

    if required.iter().all(|s| available.contains(s.as_ref())) {
        return Ok(());
    }

    Err(AuthError::InsufficientScope {
        required: required.iter().map(|s| s.as_ref().to_string()).collect(),
        available: available.iter().cloned().collect(),
    })
}

/// Scopes a route demands; state for [`scope_middleware`]
#[derive(Debug, Clone)]
pub struct RequiredScopes(Arc<[String]>);

impl RequiredScopes {
    pub fn scopes(&self) -> &[String] {
        &self.0
    }
}

/// Build the state for a scope-gated route
///
/// ```ignore
/// router.layer(axum::middleware::from_fn_with_state(
///     require_scopes(&["write"]),
///     scope_middleware,
/// ))
/// ```
pub fn require_scopes(scopes: &[&str]) -> RequiredScopes {
    RequiredScopes(scopes.iter().map(|s| s.to_string()).collect())
}

/// Reject requests whose API-key identity lacks the demanded scopes
pub async fn scope_middleware(
    State(required): State<RequiredScopes>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(context) = request.extensions().get::<AuthContext>() else {
        return ApiError::from(AuthError::MissingAuth).into_response();
    };

    if let Err(e) = check_scopes(required.scopes(), &context.scopes) {
        debug!(owner_id = %context.owner_id, required = ?required.scopes(), "scope check failed");
        return ApiError::from(e).into_response();
    }

    next.run(request).await
}
