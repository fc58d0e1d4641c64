//! Cache regions
//!
//! A [`CacheRegion`] is what the persistence layer talks to. It refines keys,
//! wraps values that carry a [`TypeShape`](crate::TypeShape) and passes
//! everything else straight to its [`CacheStore`].
//!
//! Store failures surface as [`CacheError::StoreUnavailable`]. Everything
//! else that can go wrong (tenant lookup, stale fingerprints, undecodable
//! payloads) degrades to a miss or a skipped write.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::CacheProperties;
use crate::error::{CacheError, ConfigError};
use crate::expiry::resolve_expiry_seconds;
use crate::key::{RegionKey, refine_key};
use crate::namespace::Namespace;
use crate::store::CacheStore;
use crate::versioned::{Cacheable, StoredValue, VersionedEntry};

/// One logical cache region on top of a shared store.
pub struct CacheRegion<S: CacheStore> {
    namespace: Namespace,
    expiry_seconds: u64,
    structured_entries: bool,
    store: Arc<S>,
}

impl<S: CacheStore> Clone for CacheRegion<S> {
    fn clone(&self) -> Self {
        Self {
            namespace: self.namespace.clone(),
            expiry_seconds: self.expiry_seconds,
            structured_entries: self.structured_entries,
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: CacheStore> std::fmt::Debug for CacheRegion<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegion")
            .field("namespace", &self.namespace)
            .field("expiry_seconds", &self.expiry_seconds)
            .field("structured_entries", &self.structured_entries)
            .finish()
    }
}

impl<S: CacheStore> CacheRegion<S> {
    /// Build a region, resolving its expiry from `properties`.
    ///
    /// Fails when neither `<expiry_prefix>.<namespace>` nor `<expiry_prefix>`
    /// holds a non-negative integer.
    pub fn new(
        namespace: Namespace,
        store: Arc<S>,
        properties: &CacheProperties,
        expiry_prefix: &str,
        structured_entries: bool,
    ) -> Result<Self, ConfigError> {
        let expiry_seconds = resolve_expiry_seconds(&namespace, expiry_prefix, properties)?;
        Ok(Self {
            namespace,
            expiry_seconds,
            structured_entries,
            store,
        })
    }

    pub fn name(&self) -> &str {
        self.namespace.name()
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn expiry_seconds(&self) -> u64 {
        self.expiry_seconds
    }

    pub fn structured_entries(&self) -> bool {
        self.structured_entries
    }

    /// Cached value for `key`, or `None` on a miss or a stale entry.
    pub async fn get<K, V>(&self, key: &K) -> Result<Option<V>, CacheError>
    where
        K: RegionKey + ?Sized,
        V: Cacheable,
    {
        let refined_key = refine_key(key, &self.namespace);
        debug!("Cache get [{}] : key[{}]", self.namespace, refined_key);

        let Some(raw) = self
            .store
            .get(&self.namespace, &refined_key)
            .await
            .map_err(CacheError::store("get"))?
        else {
            debug!("Cache miss [{}] : key[{}]", self.namespace, refined_key);
            return Ok(None);
        };

        let stored = match StoredValue::decode(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(
                    "Unreadable cache entry in [{}] for key[{}]: {}. Treating as miss.",
                    self.namespace, refined_key, e
                );
                return Ok(None);
            }
        };

        if let StoredValue::Versioned(entry) = &stored {
            debug!(
                "Cache get [{}] : key[{}] is a versioned entry (fingerprint {:?})",
                self.namespace,
                refined_key,
                entry.fingerprint()
            );
        }

        Ok(stored.into_value())
    }

    /// Store `value` under `key` with the region's expiry. Last writer wins.
    pub async fn put<K, V>(&self, key: &K, value: &V) -> Result<(), CacheError>
    where
        K: RegionKey + ?Sized,
        V: Cacheable,
    {
        let refined_key = refine_key(key, &self.namespace);

        let encoded = VersionedEntry::of(value, self.structured_entries).and_then(|entry| {
            let wrapped = entry.is_wrapped();
            entry.encode().map(|raw| (raw, wrapped))
        });
        let (raw, wrapped) = match encoded {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(
                    "Cannot serialize value for [{}] key[{}]: {}. Skipping cache put.",
                    self.namespace, refined_key, e
                );
                return Ok(());
            }
        };

        debug!(
            "Cache put [{}] : key[{}], versioned : {}",
            self.namespace, refined_key, wrapped
        );
        self.store
            .set(&self.namespace, &refined_key, raw, self.expiry_seconds)
            .await
            .map_err(CacheError::store("put"))
    }

    /// Remove `key`. Absent keys are not an error.
    pub async fn evict<K>(&self, key: &K) -> Result<(), CacheError>
    where
        K: RegionKey + ?Sized,
    {
        let refined_key = refine_key(key, &self.namespace);
        debug!("Cache evict [{}] : key[{}]", self.namespace, refined_key);
        self.store
            .delete(&self.namespace, &refined_key)
            .await
            .map_err(CacheError::store("evict"))
    }

    /// Drop every entry of this region.
    pub async fn evict_all(&self) -> Result<(), CacheError> {
        debug!("Cache evict all [{}]", self.namespace);
        self.store
            .evict_all(&self.namespace)
            .await
            .map_err(CacheError::store("evict_all"))
    }

    /// Whether the store holds anything under `key`, stale or not.
    pub async fn contains<K>(&self, key: &K) -> Result<bool, CacheError>
    where
        K: RegionKey + ?Sized,
    {
        let refined_key = refine_key(key, &self.namespace);
        let raw = self
            .store
            .get(&self.namespace, &refined_key)
            .await
            .map_err(CacheError::store("contains"))?;
        Ok(raw.is_some())
    }
}
