//! memcache-region - ORM cache regions on a remote key-value store
//!
//! This library sits between a persistence layer's second-level cache and a
//! memcached-like store:
//! - Keys are refined into bounded, tenant-segmented store keys
//! - Values of application types carry a type fingerprint and are refused
//!   once the type's shape changes
//! - Each region resolves its time-to-live from layered properties
//!
//! The store itself is pluggable through [`CacheStore`]; Redis and in-process
//! Moka implementations are included.

mod config;
mod error;
mod expiry;
mod factory;
pub mod key;
mod namespace;
mod region;
pub mod store;
pub mod versioned;

pub use config::{
    CacheConfig, CacheProperties, DEFAULT_EXPIRY_PREFIX, EXPIRY_PREFIX_PROPERTY,
    STRUCTURED_ENTRIES_PROPERTY,
};
pub use error::{CacheError, ConfigError, KeyError, StoreError};
pub use expiry::resolve_expiry_seconds;
pub use factory::RegionFactory;
pub use key::{EntityKey, QueryKey, RegionKey, refine_key};
pub use namespace::Namespace;
pub use region::CacheRegion;
pub use store::{CacheStore, MemoryStore, RedisStore};
pub use versioned::{Cacheable, Fingerprint, StoredValue, TypeShape, VersionedEntry};

// Re-export async_trait for store implementations
pub use async_trait::async_trait;
