//! In-memory API key store
//!
//! Development and test stand-in for the relational key store. Keyed by
//! digest; the prefix is checked as well so lookups behave like the indexed
//! query they replace.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::{ApiKeyRecord, ApiKeyStore, StoreError};

#[derive(Default)]
pub struct InMemoryApiKeyStore {
    keys: RwLock<HashMap<String, ApiKeyRecord>>,
    lookups: AtomicU64,
}

impl InMemoryApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key record
    pub async fn register(&self, record: ApiKeyRecord) {
        let mut keys = self.keys.write().await;
        keys.insert(record.key_hash.clone(), record);
    }

    /// Deactivate a key by digest
    pub async fn revoke(&self, key_hash: &str) -> bool {
        let mut keys = self.keys.write().await;
        match keys.get_mut(key_hash) {
            Some(record) => {
                record.is_active = false;
                true
            }
            None => false,
        }
    }

    pub async fn get_by_hash(&self, key_hash: &str) -> Option<ApiKeyRecord> {
        self.keys.read().await.get(key_hash).cloned()
    }

    /// Number of `find_active_by_prefix_and_hash` calls served
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryApiKeyStore {
    async fn find_active_by_prefix_and_hash(
        &self,
        prefix: &str,
        key_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKeyRecord>, StoreError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let keys = self.keys.read().await;
        Ok(keys
            .get(key_hash)
            .filter(|r| r.key_prefix == prefix && r.is_usable(now))
            .cloned())
    }

    async fn touch_last_used(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut keys = self.keys.write().await;
        if let Some(record) = keys.values_mut().find(|r| r.id == id) {
            record.last_used_at = Some(now);
        }
        Ok(())
    }
}
