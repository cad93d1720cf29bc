//! API key codec and record types
//!
//! Keys are formatted as: `gk_<64 hex chars>` (32 random bytes).
//! Only the SHA-256 digest and an 8-char prefix of the body are ever stored.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// API key scheme prefix
pub const API_KEY_PREFIX: &str = "gk_";

/// Random bytes per key
pub const API_KEY_RANDOM_BYTES: usize = 32;

/// Length of the encoded body after the scheme prefix
pub const API_KEY_BODY_LEN: usize = API_KEY_RANDOM_BYTES * 2;

/// Number of body characters used as the storage index
pub const KEY_PREFIX_LEN: usize = 8;

/// The key does not carry the expected scheme prefix or is too short
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("API key must start with `gk_` followed by at least 8 characters")]
pub struct KeyFormatError;

/// Generate a new API key from the OS CSPRNG
pub fn generate_key() -> String {
    let mut random_bytes = [0u8; API_KEY_RANDOM_BYTES];
    OsRng.fill_bytes(&mut random_bytes);
    format!("{}{}", API_KEY_PREFIX, hex::encode(random_bytes))
}

/// Hash an API key for storage and lookup
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Non-secret index slice of a key
pub fn key_prefix(key: &str) -> Result<String, KeyFormatError> {
    let body = key.strip_prefix(API_KEY_PREFIX).ok_or(KeyFormatError)?;
    body.get(..KEY_PREFIX_LEN)
        .map(str::to_string)
        .ok_or(KeyFormatError)
}

/// Structural check only; says nothing about whether the key exists
pub fn is_valid_format(key: &str) -> bool {
    match key.strip_prefix(API_KEY_PREFIX) {
        Some(body) => {
            body.len() == API_KEY_BODY_LEN && body.bytes().all(|b| b.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// A freshly generated key with the values the issuing side persists
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    /// Shown to the user once, never stored
    pub plaintext: String,
    pub prefix: String,
    pub hash: String,
}

impl GeneratedKey {
    pub fn new() -> Self {
        let plaintext = generate_key();
        let hash = hash_key(&plaintext);
        let prefix = plaintext[API_KEY_PREFIX.len()..API_KEY_PREFIX.len() + KEY_PREFIX_LEN]
            .to_string();
        Self {
            plaintext,
            prefix,
            hash,
        }
    }
}

impl Default for GeneratedKey {
    fn default() -> Self {
        Self::new()
    }
}

/// API key metadata as returned by the store
#[derive(Debug, Clone, PartialEq)]
pub struct ApiKeyRecord {
    pub id: Uuid,

    /// Account this key acts on behalf of
    pub owner_id: Uuid,

    /// Storage index (first body characters)
    pub key_prefix: String,

    /// SHA-256 of the full key (never store plaintext)
    pub key_hash: String,

    /// Granted scopes; empty means "not recorded"
    pub scopes: BTreeSet<String>,

    pub is_active: bool,

    /// `None` never expires
    pub expires_at: Option<DateTime<Utc>>,

    pub client_name: Option<String>,

    /// Carried for origin restriction; not enforced here
    pub allowed_origins: Option<BTreeSet<String>>,

    /// Advisory, updated best-effort
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    /// Active and not past its expiry
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| exp > now)
    }

    /// Fill defaults for fields the store may leave empty
    pub fn normalized(mut self) -> Self {
        if self.scopes.is_empty() {
            self.scopes = super::default_scopes();
        }
        self
    }
}

/// Persistence failure while resolving a key
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store query failed: {0}")]
    Query(String),
}

/// Lookup-by-hash interface to the persistence layer
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Find a usable key matching both prefix and digest
    ///
    /// The prefix narrows the index scan; the digest decides the match.
    async fn find_active_by_prefix_and_hash(
        &self,
        prefix: &str,
        key_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKeyRecord>, StoreError>;

    /// Record usage time. Callers do not wait on this.
    async fn touch_last_used(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError>;
}
