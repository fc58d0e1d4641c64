//! Cache error types

use std::num::ParseIntError;

use redis::RedisError;

/// Errors returned by region operations.
///
/// Store failures are the only runtime error. Configuration problems surface
/// as [`ConfigError`] when a region is built. Tenant lookup problems and stale
/// type fingerprints degrade to an empty tenant or a cache miss instead.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache store unavailable during {operation}: {source}")]
    StoreUnavailable {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

impl CacheError {
    pub(crate) fn store(operation: &'static str) -> impl FnOnce(StoreError) -> CacheError {
        move |source| CacheError::StoreUnavailable { operation, source }
    }
}

/// Failures reported by a [`CacheStore`](crate::CacheStore) implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Backend error: {0}")]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Construction-time configuration failures. A region is never built when
/// one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{namespace_key} or {default_key} (for default expiry seconds) required")]
    MissingExpiry {
        namespace_key: String,
        default_key: String,
    },

    #[error("Invalid expiry seconds for {key}: {value:?} ({source})")]
    InvalidExpiry {
        key: String,
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidSetting { key: String, value: String },
}

/// Tenant extraction failure for a raw cache key.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("tenant identifier is not a string (found {found})")]
    TenantNotString { found: &'static str },
}
