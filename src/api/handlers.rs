//! Handlers mounted by the server
//!
//! `identity` echoes whatever the admission layer published, which is what a
//! downstream business handler would consume.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Extension, State};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::{AuthContext, AuthType, SessionContext};
use crate::infra::CredentialCache;

/// Identity fields published for downstream handlers
#[derive(Debug, Serialize)]
pub struct IdentityResponse {
    pub credential_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub scopes: BTreeSet<String>,
    pub auth_type: AuthType,
    pub session_user_id: Option<String>,
    pub user_address: Option<String>,
    pub client_id: Option<String>,
    pub client_name: Option<String>,
}

impl IdentityResponse {
    pub fn new(auth: Option<&AuthContext>, session: Option<&SessionContext>) -> Self {
        Self {
            credential_id: auth.map(|a| a.credential_id),
            owner_id: auth.map(|a| a.owner_id),
            scopes: auth.map(|a| a.scopes.clone()).unwrap_or_default(),
            auth_type: auth.map_or(AuthType::None, |a| a.auth_type),
            session_user_id: session.map(|s| s.session_user_id.clone()),
            user_address: session.and_then(|s| s.user_address.clone()),
            client_id: session.and_then(|s| s.client_id.clone()),
            client_name: session
                .and_then(|s| s.client_name.clone())
                .or_else(|| auth.and_then(|a| a.client_name.clone())),
        }
    }
}

/// Echo the published identity
pub async fn identity(
    auth: Option<Extension<AuthContext>>,
    session: Option<Extension<SessionContext>>,
) -> Json<IdentityResponse> {
    Json(IdentityResponse::new(
        auth.as_ref().map(|Extension(a)| a),
        session.as_ref().map(|Extension(s)| s),
    ))
}

/// Health check endpoint.
pub async fn health_check(State(cache): State<Arc<CredentialCache>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "keygate",
        "version": env!("CARGO_PKG_VERSION"),
        "credential_cache": cache.stats_json(),
    }))
}
