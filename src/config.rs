//! Cache configuration

use std::collections::HashMap;

use crate::error::ConfigError;

/// Default prefix of the expiry keys.
pub const DEFAULT_EXPIRY_PREFIX: &str = "region.expiry.seconds";
/// Property holding an alternative expiry prefix.
pub const EXPIRY_PREFIX_PROPERTY: &str = "region.expiry.prefix";
/// Property enabling structured (map-shaped) cache entries.
pub const STRUCTURED_ENTRIES_PROPERTY: &str = "region.structured.entries";

/// Read-only string properties with an optional override layer.
///
/// Overrides shadow base values, which lets per-deployment settings replace
/// the shared defaults without copying them.
#[derive(Debug, Clone, Default)]
pub struct CacheProperties {
    base: HashMap<String, String>,
    overrides: HashMap<String, String>,
}

impl CacheProperties {
    pub fn new(base: HashMap<String, String>) -> Self {
        Self {
            base,
            overrides: HashMap::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.overrides
            .get(key)
            .or_else(|| self.base.get(key))
            .map(|s| s.as_str())
    }
}

impl<K, V> FromIterator<(K, V)> for CacheProperties
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Settings shared by every region built by a
/// [`RegionFactory`](crate::RegionFactory).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Prefix of the `<prefix>` / `<prefix>.<region>` expiry keys
    pub expiry_prefix: String,
    /// Only wrap map-shaped values in versioned entries
    pub structured_entries: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiry_prefix: DEFAULT_EXPIRY_PREFIX.to_owned(),
            structured_entries: false,
        }
    }
}

impl CacheConfig {
    pub fn from_properties(properties: &CacheProperties) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(prefix) = properties.get(EXPIRY_PREFIX_PROPERTY) {
            let prefix = prefix.trim();
            if prefix.is_empty() {
                return Err(ConfigError::InvalidSetting {
                    key: EXPIRY_PREFIX_PROPERTY.to_owned(),
                    value: prefix.to_owned(),
                });
            }
            config.expiry_prefix = prefix.to_owned();
        }

        if let Some(value) = properties.get(STRUCTURED_ENTRIES_PROPERTY) {
            config.structured_entries =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidSetting {
                        key: STRUCTURED_ENTRIES_PROPERTY.to_owned(),
                        value: value.to_owned(),
                    })?;
        }

        Ok(config)
    }
}
