//! Expiry resolution
//!
//! Each region looks up `<prefix>.<region name>` first and falls back to the
//! bare `<prefix>` default. The result is resolved once, when the region is
//! built.

use tracing::info;

use crate::config::CacheProperties;
use crate::error::ConfigError;
use crate::namespace::Namespace;

/// Time-to-live in seconds for entries of `namespace`.
pub fn resolve_expiry_seconds(
    namespace: &Namespace,
    prefix: &str,
    properties: &CacheProperties,
) -> Result<u64, ConfigError> {
    let namespace_key = format!("{}.{}", prefix, namespace.name());

    let (key, value) = match properties.get(&namespace_key) {
        Some(value) => (namespace_key, value),
        None => match properties.get(prefix) {
            Some(value) => (prefix.to_owned(), value),
            None => {
                return Err(ConfigError::MissingExpiry {
                    namespace_key,
                    default_key: prefix.to_owned(),
                });
            }
        },
    };

    let seconds = value
        .trim()
        .parse::<u64>()
        .map_err(|source| ConfigError::InvalidExpiry {
            key: key.clone(),
            value: value.to_owned(),
            source,
        })?;

    info!(
        "Expiry of cache region [{}] - {} seconds (from {})",
        namespace.name(),
        seconds,
        key
    );
    Ok(seconds)
}
