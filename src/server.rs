//! HTTP server bootstrap.
//!
//! This module wires together:
//! - configuration
//! - the admission services (credential cache, resolver, authenticator,
//!   rate limiter)
//! - the Axum router

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use secrecy::{ExposeSecret, SecretString};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::api::{health_check, identity};
use crate::auth::{
    optional_api_key, optional_session, require_api_key, require_api_key_and_session,
    require_scopes, require_session, scope_middleware, ApiKeyStore, Authenticator,
    CredentialResolver, SessionValidator, DEFAULT_SESSION_COOKIE, SCOPE_ADMIN,
};
use crate::infra::{shutdown_signal, CredentialCache, InMemoryApiKeyStore, DEFAULT_CREDENTIAL_TTL};
use crate::rate_limit::{
    rate_limit_middleware, spawn_purge_task, CountPolicy, RateLimitConfig, RateLimiter,
    WindowStore,
};

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

/// Server configuration.
#[derive(Debug)]
pub struct Config {
    /// Server listen address.
    pub listen_addr: SocketAddr,
    /// Root key; never stored or hashed.
    pub root_api_key: Option<SecretString>,
    /// HMAC secret shared with the session issuer.
    pub session_secret: Option<SecretString>,
    /// Cookie carrying the session token.
    pub session_cookie: String,
    /// Lifetime of cached credentials.
    pub credential_cache_ttl: Duration,
    /// Rate limit tiers.
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_var(&lookup, "PORT", 8080)?;
        let listen_addr = SocketAddr::from_str(&format!("{host}:{port}")).map_err(|_| {
            ConfigError::InvalidValue {
                var: "HOST",
                value: host.clone(),
            }
        })?;

        let secret = |var: &str| {
            lookup(var)
                .filter(|v| !v.is_empty())
                .map(SecretString::from)
        };

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            window: parse_secs(&lookup, "RATE_LIMIT_WINDOW_SECS", defaults.window)?,
            root_max: parse_var(&lookup, "RATE_LIMIT_ROOT_MAX", defaults.root_max)?,
            api_key_max: parse_var(&lookup, "RATE_LIMIT_API_KEY_MAX", defaults.api_key_max)?,
            session_max: parse_var(&lookup, "RATE_LIMIT_SESSION_MAX", defaults.session_max)?,
            anonymous_max: parse_var(
                &lookup,
                "RATE_LIMIT_ANONYMOUS_MAX",
                defaults.anonymous_max,
            )?,
            count_policy: parse_var(&lookup, "RATE_LIMIT_COUNT_POLICY", CountPolicy::All)?,
        };

        Ok(Self {
            listen_addr,
            root_api_key: secret("ROOT_API_KEY"),
            session_secret: secret("SESSION_SECRET"),
            session_cookie: lookup("SESSION_COOKIE")
                .unwrap_or_else(|| DEFAULT_SESSION_COOKIE.to_string()),
            credential_cache_ttl: parse_secs(
                &lookup,
                "CREDENTIAL_CACHE_TTL_SECS",
                DEFAULT_CREDENTIAL_TTL,
            )?,
            rate_limit,
        })
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        None => Ok(default),
    }
}

/// Whole seconds, at least one. A zero window would expire on creation.
fn parse_secs<F>(
    lookup: &F,
    var: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_var(lookup, var, default.as_secs())? {
        0 => Err(ConfigError::InvalidValue {
            var,
            value: "0".to_string(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

/// Admission services shared by every route. Construct once per process.
#[derive(Clone)]
pub struct Services {
    pub cache: Arc<CredentialCache>,
    pub authenticator: Arc<Authenticator>,
    pub window_store: Arc<WindowStore>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl Services {
    pub fn new(config: &Config, store: Arc<dyn ApiKeyStore>) -> Self {
        let cache = Arc::new(CredentialCache::new(config.credential_cache_ttl));
        let resolver = Arc::new(CredentialResolver::new(store, cache.clone()));

        let mut authenticator =
            Authenticator::new(resolver).with_session_cookie(config.session_cookie.clone());
        if let Some(root) = &config.root_api_key {
            authenticator = authenticator.with_root_key(root.expose_secret());
        }
        if let Some(secret) = &config.session_secret {
            authenticator = authenticator.with_sessions(Arc::new(SessionValidator::new(
                secret.expose_secret().as_bytes(),
            )));
        }

        let window_store = Arc::new(WindowStore::new());
        let rate_limiter = Arc::new(RateLimiter::new(
            window_store.clone(),
            config.rate_limit.clone(),
        ));

        Self {
            cache,
            authenticator: Arc::new(authenticator),
            window_store,
            rate_limiter,
        }
    }
}

/// Start the HTTP server.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting keygate v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Credential cache TTL: {:?}", config.credential_cache_ttl);
    info!(
        "  Rate limit window: {:?} (root {}, api key {}, session {}, anonymous {})",
        config.rate_limit.window,
        config.rate_limit.root_max,
        config.rate_limit.api_key_max,
        config.rate_limit.session_max,
        config.rate_limit.anonymous_max
    );

    if config.root_api_key.is_none() {
        warn!("ROOT_API_KEY not set; root bypass disabled");
    }
    if config.session_secret.is_none() {
        warn!("SESSION_SECRET not set; session tokens will be rejected");
    }

    // Stand-in until a relational store is wired in
    let store = Arc::new(InMemoryApiKeyStore::new());
    let services = Services::new(&config, store);

    let purge_task = spawn_purge_task(services.window_store.clone(), config.rate_limit.window);

    let app = build_router(&services);

    info!("Starting HTTP server on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    info!("keygate is ready to accept connections");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    purge_task.abort();
    services.cache.clear().await;
    services.window_store.clear();
    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Build the router
///
/// - `GET /health`: open
/// - `GET /api/identity`: optional key and session, rate limited
/// - `GET /api/session/identity`: session required, rate limited
/// - `GET /api/app/identity`: key and session required, rate limited
/// - `GET /api/admin/identity`: key with `admin` scope, rate limited
pub fn build_router(services: &Services) -> Router {
    let auth = services.authenticator.clone();
    let limiter = services.rate_limiter.clone();

    let public = Router::new()
        .route("/identity", get(identity))
        .layer(from_fn_with_state(limiter.clone(), rate_limit_middleware))
        .layer(from_fn_with_state(auth.clone(), optional_session))
        .layer(from_fn_with_state(auth.clone(), optional_api_key));

    let session = Router::new()
        .route("/session/identity", get(identity))
        .layer(from_fn_with_state(limiter.clone(), rate_limit_middleware))
        .layer(from_fn_with_state(auth.clone(), require_session));

    let app = Router::new()
        .route("/app/identity", get(identity))
        .layer(from_fn_with_state(limiter.clone(), rate_limit_middleware))
        .layer(from_fn_with_state(auth.clone(), require_api_key_and_session));

    let admin = Router::new()
        .route("/admin/identity", get(identity))
        .layer(from_fn_with_state(limiter, rate_limit_middleware))
        .layer(from_fn_with_state(
            require_scopes(&[SCOPE_ADMIN]),
            scope_middleware,
        ))
        .layer(from_fn_with_state(auth, require_api_key));

    let api = Router::new()
        .merge(public)
        .merge(session)
        .merge(app)
        .merge(admin);

    Router::new()
        .nest("/api", api)
        .route("/health", get(health_check).with_state(services.cache.clone()))
        .layer(TraceLayer::new_for_http())
}
