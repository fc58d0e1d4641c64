//! Cache namespaces
//!
//! A namespace names one logical cache region. Every key sent to the store is
//! partitioned by it and the expiry configuration is looked up under its name.

use std::fmt;

/// Logical cache region identity.
///
/// Query-result regions use the same get/put/evict behaviour as general data
/// regions; the flag only lets store adapters pick a cheaper bulk eviction
/// strategy for result sets that are invalidated wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    name: String,
    is_query_region: bool,
}

impl Namespace {
    pub fn new(name: impl Into<String>, is_query_region: bool) -> Self {
        Self {
            name: name.into(),
            is_query_region,
        }
    }

    /// Namespace for entity, collection and natural-id data.
    pub fn general(name: impl Into<String>) -> Self {
        Self::new(name, false)
    }

    /// Namespace for cached query results.
    pub fn query_results(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_query_region(&self) -> bool {
        self.is_query_region
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_query_region {
            write!(f, "{} (query results)", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}
