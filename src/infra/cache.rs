//! Credential cache
//!
//! Maps API key digests to resolved key records for a fixed TTL. There is no
//! size bound: memory is limited only by the TTL and key churn, so a client
//! spraying valid keys grows the map until the next sweep.
//!
//! Validity is checked on every read. [`CredentialCache::sweep`] only reclaims
//! memory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::auth::ApiKeyRecord;

/// Default lifetime of a cached credential
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(120);

struct CacheEntry {
    record: ApiKeyRecord,
    inserted_at: Instant,
}

/// Cache statistics
#[derive(Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Entries removed by a sweep
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// TTL-bounded map from key digest to key record
pub struct CredentialCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    stats: CacheStats,
}

impl CredentialCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a digest. Expired entries read as a miss and are left in place.
    pub async fn get(&self, key_hash: &str) -> Option<ApiKeyRecord> {
        let entries = self.entries.read().await;

        match entries.get(key_hash) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.record.clone())
            }
            _ => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or overwrite, restarting the entry's TTL
    pub async fn insert(&self, key_hash: String, record: ApiKeyRecord) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key_hash,
            CacheEntry {
                record,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove entries older than the TTL
    ///
    /// Age is evaluated under the write lock, so an entry refreshed by a
    /// concurrent `insert` is never dropped.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let before = entries.len();

        entries.retain(|_, e| now.duration_since(e.inserted_at) < self.ttl);

        let removed = before - entries.len();
        self.stats
            .expirations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Drop all entries
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }

    /// Number of stored entries, expired or not
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn stats_json(&self) -> serde_json::Value {
        serde_json::json!({
            "hits": self.stats.hits(),
            "misses": self.stats.misses(),
            "hit_rate": self.stats.hit_rate(),
            "expirations": self.stats.expirations(),
        })
    }
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new(DEFAULT_CREDENTIAL_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn record() -> ApiKeyRecord {
        ApiKeyRecord {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            key_prefix: "00000000".to_string(),
            key_hash: "hash".to_string(),
            scopes: crate::auth::default_scopes(),
            is_active: true,
            expires_at: None,
            client_name: Some("cli".to_string()),
            allowed_origins: Some(BTreeSet::new()),
            last_used_at: None,
        }
    }

    #[tokio::test]
    async fn test_cache_basic() {
        let cache = CredentialCache::default();
        let rec = record();

        cache.insert("h1".to_string(), rec.clone()).await;

        assert_eq!(cache.get("h1").await, Some(rec));
        assert_eq!(cache.get("h2").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_boundary() {
        let cache = CredentialCache::new(Duration::from_secs(120));
        cache.insert("h".to_string(), record()).await;

        tokio::time::advance(Duration::from_millis(119_999)).await;
        assert!(cache.get("h").await.is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get("h").await.is_none());

        // Expired read does not mutate the map
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_resets_ttl() {
        let cache = CredentialCache::new(Duration::from_secs(10));
        cache.insert("h".to_string(), record()).await;

        tokio::time::advance(Duration::from_secs(8)).await;
        cache.insert("h".to_string(), record()).await;

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(cache.get("h").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_fresh_entries() {
        let cache = CredentialCache::new(Duration::from_secs(10));
        cache.insert("old".to_string(), record()).await;

        tokio::time::advance(Duration::from_secs(6)).await;
        cache.insert("new".to_string(), record()).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.sweep().await, 1);

        assert_eq!(cache.len().await, 1);
        assert!(cache.get("new").await.is_some());
        assert_eq!(cache.stats().expirations(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = CredentialCache::default();
        cache.insert("a".to_string(), record()).await;
        cache.insert("b".to_string(), record()).await;

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_cache_stats() {
        let cache = CredentialCache::default();
        cache.insert("key".to_string(), record()).await;

        // Hit
        cache.get("key").await;
        cache.get("key").await;

        // Miss
        cache.get("missing").await;

        assert_eq!(cache.stats().hits(), 2);
        assert_eq!(cache.stats().misses(), 1);
        assert!((cache.stats().hit_rate() - 0.666).abs() < 0.01);
        assert_eq!(cache.stats_json()["hits"], 2);
    }
}
