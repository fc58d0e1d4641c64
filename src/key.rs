//! Cache key refinement
//!
//! Application keys can be arbitrarily long and may contain characters a
//! memcached-style store rejects. [`refine_key`] turns any [`RegionKey`] into a
//! bounded store key of the form `<sha256 of string form>_<tenant>_<hash code>`.
//!
//! Tenant identifiers are obtained through the optional [`RegionKey::tenant_id`]
//! capability. Keys that cannot report their tenant are logged and refined
//! with an empty tenant; refinement itself never fails. Tenants longer than
//! [`MAX_TENANT_SEGMENT_LEN`] are replaced by their digest, so every refined
//! key fits in [`MAX_REFINED_KEY_LEN`].

use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;
use xxhash_rust::xxh3::Xxh3;

use crate::error::KeyError;
use crate::namespace::Namespace;

/// Length of the hex digest leading every refined key.
pub const DIGEST_HEX_LEN: usize = 64;

/// Longest tenant id written into a refined key as is.
pub const MAX_TENANT_SEGMENT_LEN: usize = DIGEST_HEX_LEN;

/// Upper bound of any refined key (memcached allows 250 bytes).
pub const MAX_REFINED_KEY_LEN: usize = DIGEST_HEX_LEN + 2 + MAX_TENANT_SEGMENT_LEN + 20;

/// Key types that can be stored in a cache region.
///
/// The `Display` output is the key's string form. Two keys that should map
/// to different cache entries must differ in string form, hash code or tenant.
pub trait RegionKey: Display {
    /// Tenant owning this key, if the key type carries one.
    ///
    /// Ids longer than [`MAX_TENANT_SEGMENT_LEN`] bytes are hashed during
    /// refinement.
    fn tenant_id(&self) -> Result<Option<&str>, KeyError> {
        Ok(None)
    }

    /// Hash code that stays the same across process restarts.
    fn hash_code(&self) -> u64;
}

/// Hashes a value's `Hash` stream with xxh3, which unlike the std
/// `DefaultHasher` is stable between processes and builds.
pub fn stable_hash<H: Hash + ?Sized>(value: &H) -> u64 {
    let mut hasher = Xxh3::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Build the store key for `key` in `namespace`.
pub fn refine_key<K: RegionKey + ?Sized>(key: &K, namespace: &Namespace) -> String {
    let tenant = match key.tenant_id() {
        Ok(tenant) => tenant.unwrap_or_default(),
        Err(e) => {
            warn!(
                "Cannot retrieve tenant identifier from key in region {}: {}. Using empty tenant.",
                namespace, e
            );
            ""
        }
    };

    let digest = sha256_hex(key.to_string().as_bytes());
    if tenant.len() > MAX_TENANT_SEGMENT_LEN {
        format!("{}_{}_{}", digest, sha256_hex(tenant.as_bytes()), key.hash_code())
    } else {
        format!("{}_{}_{}", digest, tenant, key.hash_code())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl<T: RegionKey + ?Sized> RegionKey for &T {
    fn tenant_id(&self) -> Result<Option<&str>, KeyError> {
        (**self).tenant_id()
    }

    fn hash_code(&self) -> u64 {
        (**self).hash_code()
    }
}

impl RegionKey for str {
    fn hash_code(&self) -> u64 {
        stable_hash(self)
    }
}

impl RegionKey for String {
    fn hash_code(&self) -> u64 {
        stable_hash(self.as_str())
    }
}

macro_rules! plain_region_key {
    ($($ty:ty),* $(,)?) => {
        $(
            impl RegionKey for $ty {
                fn hash_code(&self) -> u64 {
                    stable_hash(self)
                }
            }
        )*
    };
}

plain_region_key!(i32, i64, u32, u64, i128, u128);

/// Key of an entity, collection or natural-id entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    role: String,
    id: String,
    tenant_id: Option<String>,
}

impl EntityKey {
    /// `role` is the entity name or collection role, `id` the identifier's
    /// string form.
    pub fn new(role: impl Into<String>, id: impl ToString) -> Self {
        Self {
            role: role.into(),
            id: id.to_string(),
            tenant_id: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.role, self.id)
    }
}

impl RegionKey for EntityKey {
    fn tenant_id(&self) -> Result<Option<&str>, KeyError> {
        Ok(self.tenant_id.as_deref())
    }

    fn hash_code(&self) -> u64 {
        stable_hash(self)
    }
}

/// Key of a cached query result.
///
/// The tenant is kept as the untyped value captured from the query session,
/// so it is only usable when it turns out to be a string.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryKey {
    sql: String,
    parameters: Vec<Value>,
    first_row: Option<u32>,
    max_rows: Option<u32>,
    tenant_identifier: Option<Value>,
}

impl QueryKey {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: Vec::new(),
            first_row: None,
            max_rows: None,
            tenant_identifier: None,
        }
    }

    pub fn with_parameters(mut self, parameters: impl IntoIterator<Item = Value>) -> Self {
        self.parameters = parameters.into_iter().collect();
        self
    }

    pub fn with_row_selection(mut self, first_row: Option<u32>, max_rows: Option<u32>) -> Self {
        self.first_row = first_row;
        self.max_rows = max_rows;
        self
    }

    pub fn with_tenant_identifier(mut self, tenant: impl Into<Value>) -> Self {
        self.tenant_identifier = Some(tenant.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)?;
        if !self.parameters.is_empty() {
            f.write_str("; parameters: ")?;
            for (i, parameter) in self.parameters.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", parameter)?;
            }
        }
        if let Some(first_row) = self.first_row {
            write!(f, "; first row: {}", first_row)?;
        }
        if let Some(max_rows) = self.max_rows {
            write!(f, "; max rows: {}", max_rows)?;
        }
        Ok(())
    }
}

impl RegionKey for QueryKey {
    fn tenant_id(&self) -> Result<Option<&str>, KeyError> {
        match &self.tenant_identifier {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(tenant)) => Ok(Some(tenant.as_str())),
            Some(other) => Err(KeyError::TenantNotString {
                found: json_kind(other),
            }),
        }
    }

    /// Hashes the fields rather than the string form, which can be
    /// ambiguous when the SQL itself contains the separators.
    fn hash_code(&self) -> u64 {
        let parameters: Vec<String> = self.parameters.iter().map(Value::to_string).collect();
        stable_hash(&(&self.sql, &parameters, self.first_row, self.max_rows))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn ns() -> Namespace {
        Namespace::general("users")
    }

    /// Key whose string form and hash code ignore the tenant.
    struct SharedShapeKey {
        tenant: &'static str,
    }

    impl Display for SharedShapeKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("User#42")
        }
    }

    impl RegionKey for SharedShapeKey {
        fn tenant_id(&self) -> Result<Option<&str>, KeyError> {
            Ok(Some(self.tenant))
        }

        fn hash_code(&self) -> u64 {
            42
        }
    }

    #[test]
    fn test_refined_key_layout() {
        let refined = refine_key("user:42", &ns());
        let parts: Vec<&str> = refined.splitn(3, '_').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), DIGEST_HEX_LEN);
        assert!(parts[0].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(parts[1], "");
        assert_eq!(parts[2], "user:42".hash_code().to_string());
    }

    #[test]
    fn test_string_and_str_keys_refine_identically() {
        assert_eq!(
            refine_key("user:42", &ns()),
            refine_key(&"user:42".to_owned(), &ns())
        );
    }

    #[test]
    fn test_entity_key_carries_tenant() {
        let key = EntityKey::new("User", 42).with_tenant("acme");
        let refined = refine_key(&key, &ns());
        assert!(refined.contains("_acme_"));
    }

    #[test]
    fn test_tenants_partition_identical_keys() {
        let acme = SharedShapeKey { tenant: "acme" };
        let beta = SharedShapeKey { tenant: "beta" };

        assert_eq!(acme.to_string(), beta.to_string());
        assert_eq!(acme.hash_code(), beta.hash_code());
        assert_ne!(refine_key(&acme, &ns()), refine_key(&beta, &ns()));
    }

    #[test]
    fn test_query_key_string_tenant() {
        let key = QueryKey::new("select * from users where id = ?")
            .with_parameters([json!(42)])
            .with_tenant_identifier("acme");

        assert_eq!(key.tenant_id().unwrap(), Some("acme"));
        assert!(refine_key(&key, &Namespace::query_results("q")).contains("_acme_"));
    }

    #[test]
    fn test_query_key_unusable_tenant_degrades_to_empty() {
        let key = QueryKey::new("select 1").with_tenant_identifier(json!({ "id": 7 }));

        assert!(matches!(
            key.tenant_id(),
            Err(KeyError::TenantNotString { found: "object" })
        ));

        let refined = refine_key(&key, &Namespace::query_results("q"));
        let untenanted = refine_key(&QueryKey::new("select 1"), &Namespace::query_results("q"));
        assert_eq!(refined, untenanted);
    }

    #[test]
    fn test_query_key_display() {
        let key = QueryKey::new("select * from t where a = ? and b = ?")
            .with_parameters([json!(1), json!("x")])
            .with_row_selection(Some(10), Some(20));

        assert_eq!(
            key.to_string(),
            "select * from t where a = ? and b = ?; parameters: 1, \"x\"; first row: 10; max rows: 20"
        );
    }

    #[test]
    fn test_length_bounded_regardless_of_key_size() {
        let short = "k".repeat(10);
        let long = "k".repeat(10_000);

        let short_len = refine_key(&short, &ns()).len();
        let long_len = refine_key(&long, &ns()).len();

        assert!(short_len <= MAX_REFINED_KEY_LEN);
        assert!(long_len <= MAX_REFINED_KEY_LEN);
    }

    #[test]
    fn test_long_tenants_are_hashed() {
        let tenant = "t".repeat(1_000);
        let refined = refine_key(&EntityKey::new("User", 42).with_tenant(tenant.clone()), &ns());

        assert!(refined.len() <= MAX_REFINED_KEY_LEN);
        assert!(!refined.contains(&tenant));

        let other = refine_key(&EntityKey::new("User", 42).with_tenant("t".repeat(999)), &ns());
        assert_ne!(refined, other);

        let exact = "t".repeat(MAX_TENANT_SEGMENT_LEN);
        let refined = refine_key(&EntityKey::new("User", 42).with_tenant(exact.clone()), &ns());
        assert!(refined.contains(&format!("_{}_", exact)));
        assert!(refined.len() <= MAX_REFINED_KEY_LEN);
    }

    #[test]
    fn test_query_keys_with_same_string_form_stay_apart() {
        let inlined = QueryKey::new("select a from t; max rows: 5");
        let selected = QueryKey::new("select a from t").with_row_selection(None, Some(5));
        assert_eq!(inlined.to_string(), selected.to_string());
        assert_ne!(inlined, selected);

        let queries = Namespace::query_results("q");
        assert_ne!(refine_key(&inlined, &queries), refine_key(&selected, &queries));

        let split = QueryKey::new("select ?").with_parameters([json!("a, b")]);
        let pair = QueryKey::new("select ?").with_parameters([json!("a"), json!("b")]);
        assert_ne!(split.hash_code(), pair.hash_code());
    }

    #[test]
    fn test_no_collisions_in_large_corpus() {
        let mut seen = HashSet::new();
        for i in 0..50_000u32 {
            let key = EntityKey::new("User", i);
            assert!(seen.insert(refine_key(&key, &ns())), "collision at {}", i);
        }
    }

    proptest! {
        #[test]
        fn prop_refine_is_deterministic(raw in ".*", tenant in "[a-z]{0,12}") {
            let key = EntityKey::new(raw.clone(), 1).with_tenant(tenant.clone());
            let again = EntityKey::new(raw, 1).with_tenant(tenant);
            prop_assert_eq!(refine_key(&key, &ns()), refine_key(&again, &ns()));
        }

        #[test]
        fn prop_refined_length_is_bounded(raw in ".{0,4000}") {
            prop_assert!(refine_key(&raw, &ns()).len() <= MAX_REFINED_KEY_LEN);
        }

        #[test]
        fn prop_distinct_string_forms_do_not_collide(a in "[a-z0-9:]{1,64}", b in "[a-z0-9:]{1,64}") {
            prop_assume!(a != b);
            prop_assert_ne!(refine_key(&a, &ns()), refine_key(&b, &ns()));
        }
    }
}
