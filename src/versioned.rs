//! Versioned cache entries
//!
//! A store may outlive the process that wrote to it. When an application type
//! changes shape between deployments, an old entry could still deserialize
//! into the new type and silently carry wrong data. Types that declare a
//! [`TypeShape`] are therefore written inside a [`VersionedEntry`] holding the
//! shape's fingerprint, and are only handed back when the reader's type has
//! the same fingerprint.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Member name marking a stored JSON object as a versioned entry.
pub const ENVELOPE_FIELD: &str = "__versioned_entry";

/// Stable description of a type's serialized shape.
///
/// Bump `version` or change `fields` whenever previously cached values must
/// stop being reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeShape {
    name: &'static str,
    version: u32,
    fields: &'static [(&'static str, &'static str)],
}

impl TypeShape {
    /// `fields` lists `(field name, field type)` pairs in declaration order.
    pub const fn new(
        name: &'static str,
        version: u32,
        fields: &'static [(&'static str, &'static str)],
    ) -> Self {
        Self {
            name,
            version,
            fields,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0]);
        hasher.update(self.version.to_be_bytes());
        for (field, ty) in self.fields {
            hasher.update([0]);
            hasher.update(field.as_bytes());
            hasher.update(b":");
            hasher.update(ty.as_bytes());
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }
}

/// Hex SHA-256 of a [`TypeShape`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Values that can be stored in a cache region.
///
/// Application types override [`type_shape`](Cacheable::type_shape) to opt
/// into fingerprint validation. Primitive and standard container types keep
/// the default: their JSON form cannot drift between builds.
pub trait Cacheable: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn type_shape() -> Option<TypeShape> {
        None
    }
}

macro_rules! shapeless_cacheable {
    ($($ty:ty),* $(,)?) => {
        $(impl Cacheable for $ty {})*
    };
}

shapeless_cacheable!(
    bool, char, i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, f32, f64, String, Value,
);

impl<T: Cacheable> Cacheable for Vec<T> {}

impl<T: Cacheable> Cacheable for Option<T> {}

impl<K, V> Cacheable for HashMap<K, V>
where
    K: Serialize + DeserializeOwned + Eq + Hash + Send + Sync + 'static,
    V: Cacheable,
{
}

impl<K, V> Cacheable for BTreeMap<K, V>
where
    K: Serialize + DeserializeOwned + Ord + Send + Sync + 'static,
    V: Cacheable,
{
}

/// Whether a payload has to carry a fingerprint.
///
/// With structured entries enabled only map-shaped payloads are wrapped, as
/// those are the only ones whose field layout can drift.
pub fn is_wrapping_applicable(
    payload: &Value,
    shape: Option<&TypeShape>,
    structured_entries: bool,
) -> bool {
    match shape {
        Some(_) => !structured_entries || payload.is_object(),
        None => false,
    }
}

/// A payload together with the fingerprint of its type at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedEntry {
    type_name: Option<String>,
    fingerprint: Option<Fingerprint>,
    wrapped: bool,
    payload: Value,
}

impl VersionedEntry {
    pub fn wrap(payload: Value, shape: Option<&TypeShape>, structured_entries: bool) -> Self {
        let wrapped = is_wrapping_applicable(&payload, shape, structured_entries);
        Self {
            type_name: shape.map(|s| s.name().to_owned()),
            fingerprint: shape.filter(|_| wrapped).map(TypeShape::fingerprint),
            wrapped,
            payload,
        }
    }

    /// Serialize `value` and wrap it according to `V`'s shape.
    pub fn of<V: Cacheable>(value: &V, structured_entries: bool) -> serde_json::Result<Self> {
        let payload = serde_json::to_value(value)?;
        Ok(Self::wrap(
            payload,
            V::type_shape().as_ref(),
            structured_entries,
        ))
    }

    pub fn is_wrapped(&self) -> bool {
        self.wrapped
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Payload as `V`, or `None` when `V`'s current fingerprint differs from
    /// the one recorded at write time.
    pub fn unwrap<V: Cacheable>(self) -> Option<V> {
        if self.wrapped {
            let current = V::type_shape().map(|shape| shape.fingerprint());
            if current.is_none() || current != self.fingerprint {
                debug!(
                    "Versioned entry for {} is stale: stored fingerprint {:?}, current {:?}",
                    self.type_name.as_deref().unwrap_or("<unknown>"),
                    self.fingerprint,
                    current
                );
                return None;
            }
        }

        decode_payload(self.payload)
    }

    /// JSON text written to the store. Entries that were not wrapped are
    /// written as their bare payload.
    pub fn encode(self) -> serde_json::Result<String> {
        if self.wrapped {
            let mut envelope = serde_json::Map::with_capacity(1);
            envelope.insert(ENVELOPE_FIELD.to_owned(), serde_json::to_value(self)?);
            serde_json::to_string(&Value::Object(envelope))
        } else {
            serde_json::to_string(&self.payload)
        }
    }

    #[cfg(test)]
    pub(crate) fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }
}

/// A value read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Versioned(VersionedEntry),
    /// Anything that is not a versioned entry, including values written
    /// before wrapping was introduced.
    Plain(Value),
}

impl StoredValue {
    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        let mut value: Value = serde_json::from_str(raw)?;
        if let Value::Object(map) = &mut value
            && map.len() == 1
            && let Some(entry) = map.remove(ENVELOPE_FIELD)
        {
            return serde_json::from_value(entry).map(StoredValue::Versioned);
        }
        Ok(StoredValue::Plain(value))
    }

    pub fn into_value<V: Cacheable>(self) -> Option<V> {
        match self {
            StoredValue::Versioned(entry) => entry.unwrap(),
            StoredValue::Plain(value) => decode_payload(value),
        }
    }
}

fn decode_payload<V: Cacheable>(payload: Value) -> Option<V> {
    match serde_json::from_value(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to deserialize cached value: {}. Treating as miss.", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u64,
        name: String,
    }

    impl Cacheable for User {
        fn type_shape() -> Option<TypeShape> {
            Some(TypeShape::new("User", 1, &[("id", "u64"), ("name", "String")]))
        }
    }

    /// Same JSON layout as `User`, one version later.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct UserV2 {
        id: u64,
        name: String,
    }

    impl Cacheable for UserV2 {
        fn type_shape() -> Option<TypeShape> {
            Some(TypeShape::new("User", 2, &[("id", "u64"), ("name", "String")]))
        }
    }

    fn user() -> User {
        User {
            id: 42,
            name: "a".to_owned(),
        }
    }

    #[test]
    fn test_fingerprint_depends_on_every_part() {
        let base = TypeShape::new("User", 1, &[("id", "u64")]);
        let renamed = TypeShape::new("Account", 1, &[("id", "u64")]);
        let bumped = TypeShape::new("User", 2, &[("id", "u64")]);
        let retyped = TypeShape::new("User", 1, &[("id", "String")]);
        let extended = TypeShape::new("User", 1, &[("id", "u64"), ("email", "String")]);

        assert_eq!(base.fingerprint(), base.fingerprint());
        for other in [renamed, bumped, retyped, extended] {
            assert_ne!(base.fingerprint(), other.fingerprint());
        }
        assert_eq!(base.fingerprint().as_str().len(), 64);
    }

    #[test]
    fn test_wrapping_applicability() {
        let shape = User::type_shape();
        let object = json!({ "id": 1 });
        let scalar = json!(1);

        assert!(is_wrapping_applicable(&object, shape.as_ref(), false));
        assert!(is_wrapping_applicable(&scalar, shape.as_ref(), false));
        assert!(is_wrapping_applicable(&object, shape.as_ref(), true));
        assert!(!is_wrapping_applicable(&scalar, shape.as_ref(), true));
        assert!(!is_wrapping_applicable(&object, None, false));
    }

    #[test]
    fn test_round_trip_with_unchanged_shape() {
        let entry = VersionedEntry::of(&user(), false).unwrap();
        assert!(entry.is_wrapped());
        assert_eq!(entry.fingerprint(), User::type_shape().map(|s| s.fingerprint()).as_ref());

        assert_eq!(entry.unwrap::<User>(), Some(user()));
    }

    #[test]
    fn test_forged_fingerprint_is_a_miss() {
        let forged = TypeShape::new("User", 0, &[]).fingerprint();
        let entry = VersionedEntry::of(&user(), false)
            .unwrap()
            .with_fingerprint(forged);

        assert_eq!(entry.unwrap::<User>(), None);
    }

    #[test]
    fn test_shape_change_is_a_miss() {
        let entry = VersionedEntry::of(&user(), false).unwrap();
        assert_eq!(entry.unwrap::<UserV2>(), None);
    }

    #[test]
    fn test_shapeless_reader_misses_wrapped_entry() {
        let entry = VersionedEntry::of(&user(), false).unwrap();
        assert_eq!(entry.unwrap::<Value>(), None);
    }

    #[test]
    fn test_unwrapped_values_pass_through() {
        let entry = VersionedEntry::of(&vec![1u32, 2, 3], false).unwrap();
        assert!(!entry.is_wrapped());
        assert_eq!(entry.fingerprint(), None);
        assert_eq!(entry.unwrap::<Vec<u32>>(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_encode_decode_wrapped() {
        let raw = VersionedEntry::of(&user(), false).unwrap().encode().unwrap();
        assert!(raw.contains(ENVELOPE_FIELD));

        let stored = StoredValue::decode(&raw).unwrap();
        assert!(matches!(stored, StoredValue::Versioned(_)));
        assert_eq!(stored.into_value::<User>(), Some(user()));
    }

    #[test]
    fn test_unwrapped_entry_is_stored_bare() {
        let raw = VersionedEntry::of(&"hello".to_owned(), false)
            .unwrap()
            .encode()
            .unwrap();
        assert_eq!(raw, "\"hello\"");
    }

    #[test]
    fn test_legacy_plain_value_decodes_directly() {
        let stored = StoredValue::decode(r#"{"id":42,"name":"a"}"#).unwrap();
        assert!(matches!(stored, StoredValue::Plain(_)));
        assert_eq!(stored.into_value::<User>(), Some(user()));
    }

    #[test]
    fn test_undecodable_payload_is_a_miss() {
        let stored = StoredValue::decode(r#"{"unexpected":true}"#).unwrap();
        assert_eq!(stored.into_value::<User>(), None);
    }

    #[test]
    fn test_corrupt_envelope_is_an_error() {
        assert!(StoredValue::decode(r#"{"__versioned_entry":5}"#).is_err());
        assert!(StoredValue::decode("not json").is_err());
    }
}
