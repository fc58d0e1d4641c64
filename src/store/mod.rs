//! Store collaborators
//!
//! A [`CacheStore`] is the remote key-value service the regions delegate to.
//! It owns connection handling, retries, timeouts and the way a namespace is
//! laid out in its key space. Regions only hand it refined keys and JSON text.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::namespace::Namespace;

mod memory_store;
mod redis_store;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;

/// Namespace-aware key-value store.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Fetch the value stored under `key`, or `None` if absent or expired.
    async fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`. A `ttl_seconds` of zero means no expiry.
    async fn set(
        &self,
        namespace: &Namespace,
        key: &str,
        value: String,
        ttl_seconds: u64,
    ) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<(), StoreError>;

    /// Make every entry of `namespace` unreachable.
    async fn evict_all(&self, namespace: &Namespace) -> Result<(), StoreError>;
}
