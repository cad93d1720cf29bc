//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use uuid::Uuid;

use keygate::auth::{ApiKeyRecord, GeneratedKey, SessionValidator};
use keygate::infra::InMemoryApiKeyStore;
use keygate::server::{build_router, Config, Services};

/// Root key configured for every test app
pub const TEST_ROOT_KEY: &str = "root-test-key-0123456789";

/// HMAC secret configured for every test app
pub const TEST_SESSION_SECRET: &str = "test-session-secret";

/// Test owner ID
pub fn test_owner_id() -> Uuid {
    Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap()
}

/// A running router plus handles on its collaborators
pub struct TestApp {
    pub router: Router,
    pub services: Services,
    pub store: Arc<InMemoryApiKeyStore>,
}

impl TestApp {
    /// Build with default settings
    pub fn new() -> Self {
        Self::with_env(&[])
    }

    /// Build with extra environment overrides
    pub fn with_env(overrides: &[(&str, &str)]) -> Self {
        let mut vars: HashMap<String, String> = HashMap::from([
            ("ROOT_API_KEY".to_string(), TEST_ROOT_KEY.to_string()),
            ("SESSION_SECRET".to_string(), TEST_SESSION_SECRET.to_string()),
        ]);
        for (k, v) in overrides {
            vars.insert(k.to_string(), v.to_string());
        }

        let config = Config::from_lookup(|var| vars.get(var).cloned()).unwrap();
        let store = Arc::new(InMemoryApiKeyStore::new());
        let services = Services::new(&config, store.clone());
        let router = build_router(&services);

        Self {
            router,
            services,
            store,
        }
    }

    /// Register a fresh key with the given scopes, returning its plaintext
    pub async fn register_key(&self, scopes: &[&str]) -> (String, ApiKeyRecord) {
        let generated = GeneratedKey::new();
        let record = key_record(&generated, scopes);
        self.store.register(record.clone()).await;
        (generated.plaintext, record)
    }

    /// Send a request through the router
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;
        self.router.clone().oneshot(request).await.unwrap()
    }
}

/// Build a stored record for a generated key
pub fn key_record(generated: &GeneratedKey, scopes: &[&str]) -> ApiKeyRecord {
    ApiKeyRecord {
        id: Uuid::new_v4(),
        owner_id: test_owner_id(),
        key_prefix: generated.prefix.clone(),
        key_hash: generated.hash.clone(),
        scopes: scopes.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        is_active: true,
        expires_at: None,
        client_name: Some("test-client".to_string()),
        allowed_origins: None,
        last_used_at: None,
    }
}

/// Issue a session token signed with the test secret
pub fn session_token(user_id: &str) -> String {
    SessionValidator::new(TEST_SESSION_SECRET.as_bytes())
        .issue(
            user_id,
            Some("0xabc"),
            Some("client-1"),
            Some("Test Client"),
            chrono::Duration::hours(1),
        )
        .unwrap()
}

/// Issue a token that expired two minutes ago
pub fn expired_session_token(user_id: &str) -> String {
    SessionValidator::new(TEST_SESSION_SECRET.as_bytes())
        .issue(user_id, None, None, None, chrono::Duration::seconds(-120))
        .unwrap()
}

/// GET request builder
pub fn get(uri: &str) -> axum::http::request::Builder {
    Request::builder().method("GET").uri(uri)
}

/// Read a JSON body
pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
