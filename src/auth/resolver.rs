//! API key resolution
//!
//! digest → cache → store (prefix + digest) → cache fill → detached
//! usage update. Store failures never reach the caller; they read as an
//! unknown key.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{hash_key, key_prefix, ApiKeyRecord, ApiKeyStore, AuthError};
use crate::infra::CredentialCache;

/// Fraction of resolutions that trigger a background cache sweep
pub const DEFAULT_SWEEP_PROBABILITY: f64 = 0.01;

/// Resolves plaintext API keys to usable key records
pub struct CredentialResolver {
    store: Arc<dyn ApiKeyStore>,
    cache: Arc<CredentialCache>,
    sweep_probability: f64,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn ApiKeyStore>, cache: Arc<CredentialCache>) -> Self {
        Self {
            store,
            cache,
            sweep_probability: DEFAULT_SWEEP_PROBABILITY,
        }
    }

    /// Set the sweep probability (clamped to `0.0..=1.0`)
    pub fn with_sweep_probability(mut self, probability: f64) -> Self {
        self.sweep_probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    /// Resolve a key to its record
    ///
    /// Returns [`AuthError::InvalidFormat`] when no prefix can be derived and
    /// [`AuthError::InvalidApiKey`] for unknown, inactive or expired keys and
    /// for store failures.
    pub async fn resolve(&self, key: &str) -> Result<ApiKeyRecord, AuthError> {
        self.maybe_sweep();

        let key_hash = hash_key(key);
        let now = Utc::now();

        if let Some(record) = self.cache.get(&key_hash).await {
            // Cached records can outlive their own expiry by up to one TTL
            if record.is_usable(now) {
                return Ok(record);
            }
            return Err(AuthError::InvalidApiKey);
        }

        let prefix = key_prefix(key).map_err(|_| AuthError::InvalidFormat)?;

        let record = match self
            .store
            .find_active_by_prefix_and_hash(&prefix, &key_hash, now)
            .await
        {
            Ok(Some(record)) => record.normalized(),
            Ok(None) => {
                debug!(key_prefix = %prefix, "API key not found");
                return Err(AuthError::InvalidApiKey);
            }
            Err(e) => {
                error!(error = %e, key_prefix = %prefix, "API key store lookup failed");
                return Err(AuthError::InvalidApiKey);
            }
        };

        // The digest is the match criterion; the prefix only narrows the scan
        if record.key_hash != key_hash || !record.is_usable(now) {
            warn!(key_id = %record.id, "store returned a non-matching or unusable key record");
            return Err(AuthError::InvalidApiKey);
        }

        self.cache.insert(key_hash, record.clone()).await;
        self.spawn_touch(record.id);

        Ok(record)
    }

    /// Fire-and-forget `last_used_at` update
    fn spawn_touch(&self, id: Uuid) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.touch_last_used(id, Utc::now()).await {
                warn!(error = %e, key_id = %id, "failed to update API key last_used_at");
            }
        });
    }

    fn maybe_sweep(&self) {
        if self.sweep_probability <= 0.0 || !rand::thread_rng().gen_bool(self.sweep_probability) {
            return;
        }

        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            let removed = cache.sweep().await;
            if removed > 0 {
                debug!(removed, "swept expired credential cache entries");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{GeneratedKey, MockApiKeyStore, StoreError, SCOPE_ADMIN};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn record_for(key: &GeneratedKey) -> ApiKeyRecord {
        ApiKeyRecord {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            key_prefix: key.prefix.clone(),
            key_hash: key.hash.clone(),
            scopes: BTreeSet::new(),
            is_active: true,
            expires_at: None,
            client_name: Some("test-app".to_string()),
            allowed_origins: None,
            last_used_at: None,
        }
    }

    fn resolver(store: MockApiKeyStore) -> CredentialResolver {
        CredentialResolver::new(Arc::new(store), Arc::new(CredentialCache::default()))
            .with_sweep_probability(0.0)
    }

    #[tokio::test]
    async fn test_resolve_fills_defaults_and_caches() {
        let key = GeneratedKey::new();
        let record = record_for(&key);

        let mut store = MockApiKeyStore::new();
        let expected_prefix = key.prefix.clone();
        let expected_hash = key.hash.clone();
        store
            .expect_find_active_by_prefix_and_hash()
            .withf(move |prefix, hash, _| *prefix == expected_prefix && *hash == expected_hash)
            .times(1)
            .returning(move |_, _, _| Ok(Some(record.clone())));
        store.expect_touch_last_used().returning(|_, _| Ok(()));

        let resolver = resolver(store);

        let first = resolver.resolve(&key.plaintext).await.unwrap();
        assert_eq!(first.scopes, crate::auth::default_scopes());

        // Second resolution is served from cache (store expects one call)
        let second = resolver.resolve(&key.plaintext).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.cache().stats().hits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_consulted_again_after_ttl() {
        let key = GeneratedKey::new();
        let record = record_for(&key);
        let revoked = Arc::new(AtomicBool::new(false));

        let mut store = MockApiKeyStore::new();
        let flag = revoked.clone();
        store
            .expect_find_active_by_prefix_and_hash()
            .times(2)
            .returning(move |_, _, _| {
                if flag.load(Ordering::SeqCst) {
                    Ok(None)
                } else {
                    Ok(Some(record.clone()))
                }
            });
        store.expect_touch_last_used().returning(|_, _| Ok(()));

        let resolver = resolver(store);
        assert!(resolver.resolve(&key.plaintext).await.is_ok());

        // Revoked in the store, still served from cache inside the TTL
        revoked.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_millis(119_999)).await;
        assert!(resolver.resolve(&key.plaintext).await.is_ok());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(
            resolver.resolve(&key.plaintext).await,
            Err(AuthError::InvalidApiKey)
        );
    }

    #[tokio::test]
    async fn test_keeps_stored_scopes() {
        let key = GeneratedKey::new();
        let mut record = record_for(&key);
        record.scopes.insert(SCOPE_ADMIN.to_string());

        let mut store = MockApiKeyStore::new();
        store
            .expect_find_active_by_prefix_and_hash()
            .returning(move |_, _, _| Ok(Some(record.clone())));
        store.expect_touch_last_used().returning(|_, _| Ok(()));

        let resolved = resolver(store).resolve(&key.plaintext).await.unwrap();
        assert_eq!(resolved.scopes.len(), 1);
        assert!(resolved.scopes.contains(SCOPE_ADMIN));
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let mut store = MockApiKeyStore::new();
        store
            .expect_find_active_by_prefix_and_hash()
            .returning(|_, _, _| Ok(None));

        let key = GeneratedKey::new();
        assert_eq!(
            resolver(store).resolve(&key.plaintext).await,
            Err(AuthError::InvalidApiKey)
        );
    }

    #[tokio::test]
    async fn test_store_error_degrades_to_not_found() {
        let mut store = MockApiKeyStore::new();
        store
            .expect_find_active_by_prefix_and_hash()
            .returning(|_, _, _| Err(StoreError::Unavailable("connection refused".into())));

        let key = GeneratedKey::new();
        let resolver = resolver(store);
        assert_eq!(
            resolver.resolve(&key.plaintext).await,
            Err(AuthError::InvalidApiKey)
        );
        assert!(resolver.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_key_skips_store() {
        let mut store = MockApiKeyStore::new();
        store.expect_find_active_by_prefix_and_hash().times(0);

        assert_eq!(
            resolver(store).resolve("not-a-key").await,
            Err(AuthError::InvalidFormat)
        );
    }

    #[tokio::test]
    async fn test_touch_failure_is_swallowed() {
        let key = GeneratedKey::new();
        let record = record_for(&key);

        let mut store = MockApiKeyStore::new();
        store
            .expect_find_active_by_prefix_and_hash()
            .returning(move |_, _, _| Ok(Some(record.clone())));
        store
            .expect_touch_last_used()
            .returning(|_, _| Err(StoreError::Query("deadlock".into())));

        let resolver = resolver(store);
        assert!(resolver.resolve(&key.plaintext).await.is_ok());

        // Let the detached task run; the outcome above must not change
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(resolver.resolve(&key.plaintext).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_record_with_other_digest() {
        let key = GeneratedKey::new();
        let mut record = record_for(&key);
        record.key_hash = hash_key("someone-else");

        let mut store = MockApiKeyStore::new();
        store
            .expect_find_active_by_prefix_and_hash()
            .returning(move |_, _, _| Ok(Some(record.clone())));

        assert_eq!(
            resolver(store).resolve(&key.plaintext).await,
            Err(AuthError::InvalidApiKey)
        );
    }

    #[tokio::test]
    async fn test_cached_record_past_expiry_is_rejected() {
        let key = GeneratedKey::new();
        let mut record = record_for(&key).normalized();
        record.expires_at = Some(Utc::now() - chrono::Duration::seconds(5));

        let cache = Arc::new(CredentialCache::default());
        cache.insert(key.hash.clone(), record).await;

        let mut store = MockApiKeyStore::new();
        store.expect_find_active_by_prefix_and_hash().times(0);

        let resolver = CredentialResolver::new(Arc::new(store), cache).with_sweep_probability(0.0);
        assert_eq!(
            resolver.resolve(&key.plaintext).await,
            Err(AuthError::InvalidApiKey)
        );
    }
}
