//! Region factory
//!
//! Builds every region of an application against one shared store and one
//! set of properties, so that expiry and entry settings are read the same way
//! for all of them.

use std::sync::Arc;

use tracing::debug;

use crate::config::{CacheConfig, CacheProperties};
use crate::error::ConfigError;
use crate::namespace::Namespace;
use crate::region::CacheRegion;
use crate::store::CacheStore;

pub struct RegionFactory<S: CacheStore> {
    store: Arc<S>,
    properties: CacheProperties,
    config: CacheConfig,
}

impl<S: CacheStore> Clone for RegionFactory<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            properties: self.properties.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: CacheStore> RegionFactory<S> {
    pub fn new(store: Arc<S>, properties: CacheProperties, config: CacheConfig) -> Self {
        Self {
            store,
            properties,
            config,
        }
    }

    /// Factory whose [`CacheConfig`] is read from `properties` as well.
    pub fn from_properties(store: Arc<S>, properties: CacheProperties) -> Result<Self, ConfigError> {
        let config = CacheConfig::from_properties(&properties)?;
        Ok(Self::new(store, properties, config))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Region for entity, collection or natural-id data.
    pub fn build_general_data_region(&self, name: &str) -> Result<CacheRegion<S>, ConfigError> {
        self.build(Namespace::general(name))
    }

    /// Region for query results.
    pub fn build_query_results_region(&self, name: &str) -> Result<CacheRegion<S>, ConfigError> {
        self.build(Namespace::query_results(name))
    }

    fn build(&self, namespace: Namespace) -> Result<CacheRegion<S>, ConfigError> {
        debug!("Building cache region {}", namespace);
        CacheRegion::new(
            namespace,
            Arc::clone(&self.store),
            &self.properties,
            &self.config.expiry_prefix,
            self.config.structured_entries,
        )
    }
}
