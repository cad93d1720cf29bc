//! Infrastructure for the admission layer
//!
//! - Credential caching (in-memory, TTL-bounded)
//! - In-memory API key store for development and tests
//! - Shutdown signal handling

mod cache;
mod memory;
mod shutdown;

pub use cache::{CacheStats, CredentialCache, DEFAULT_CREDENTIAL_TTL};
pub use memory::InMemoryApiKeyStore;
pub use shutdown::shutdown_signal;
