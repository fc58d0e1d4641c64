//! In-process store backed by Moka
//!
//! Not distributed: every process sees its own entries. Useful for tests and
//! single-instance deployments that still want the region semantics.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use tracing::debug;

use super::CacheStore;
use crate::error::StoreError;
use crate::namespace::Namespace;

type EntryKey = (String, String);

#[derive(Debug, Clone)]
struct StoredEntry {
    value: String,
    ttl: Option<Duration>,
}

/// Expires each entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<EntryKey, StoredEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &EntryKey,
        value: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &EntryKey,
        value: &StoredEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// [`CacheStore`] keeping entries in a bounded Moka cache.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Cache<EntryKey, StoredEntry>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("max_capacity", &self.entries.policy().max_capacity())
            .field("entry_count", &self.entries.entry_count())
            .finish()
    }
}

impl MemoryStore {
    pub fn new(max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .support_invalidation_closures()
            .build();

        debug!("Moka memory store created (max capacity {})", max_capacity);
        Self { entries }
    }

    fn entry_key(namespace: &Namespace, key: &str) -> EntryKey {
        (namespace.name().to_owned(), key.to_owned())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<String>, StoreError> {
        let entry = self.entries.get(&Self::entry_key(namespace, key)).await;
        Ok(entry.map(|entry| entry.value))
    }

    async fn set(
        &self,
        namespace: &Namespace,
        key: &str,
        value: String,
        ttl_seconds: u64,
    ) -> Result<(), StoreError> {
        let ttl = (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds));
        self.entries
            .insert(Self::entry_key(namespace, key), StoredEntry { value, ttl })
            .await;
        Ok(())
    }

    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<(), StoreError> {
        self.entries
            .invalidate(&Self::entry_key(namespace, key))
            .await;
        Ok(())
    }

    async fn evict_all(&self, namespace: &Namespace) -> Result<(), StoreError> {
        let name = namespace.name().to_owned();
        self.entries
            .invalidate_entries_if(move |key, _| key.0 == name)
            .map_err(|e| StoreError::Backend(Box::new(e)))?;
        debug!("Memory store evicted all entries of {}", namespace);
        Ok(())
    }
}
