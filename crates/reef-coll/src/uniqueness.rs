//! The uniqueness engine.
//!
//! Derives the canonical string key that identifies an element within a
//! collection. Key determinism is the load-bearing correctness property of
//! the whole engine: elements that are equal under the collection's equality
//! notion must always yield equal keys.

use reef_types::{PathKey, ResourceUrl};
use reef_value::{codec, ElementShape, Value};
use uuid::Uuid;

use crate::error::{CollectionError, Result};

/// Identity strategy of a collection. Exactly one strategy is active per
/// collection for its whole lifetime; changing it requires a migration that
/// replaces the collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UniquenessPolicy {
    /// Key = canonical serialized form of the element. Requires immutable
    /// elements, since a mutable element's representation could change after
    /// insertion.
    ByRepresentation,
    /// Key = trailing segment of the element's resource URL, which must be a
    /// direct child of the collection's URL. Only valid on persisted, shared
    /// collections; elements without a URL are minted one on insertion.
    ByUrl,
    /// Key = canonical serialized form of one named property.
    ByProperty(String),
}

impl UniquenessPolicy {
    /// Validate the policy against the collection's element shape at
    /// construction time. `ByProperty` requires the shape to expose the
    /// property.
    pub fn validate_against_shape(&self, shape: &dyn ElementShape) -> Result<()> {
        if let UniquenessPolicy::ByProperty(property) = self {
            if !shape.has_property(property) {
                return Err(CollectionError::PropertyNotInShape {
                    property: property.clone(),
                });
            }
        }
        Ok(())
    }

    /// Whether `Has`/`Get`/collision checks must also compare element
    /// identity, not just key equality. Under `ByRepresentation` the key *is*
    /// the whole value, so key equality is value equality.
    pub fn is_identity_sensitive(&self) -> bool {
        !matches!(self, UniquenessPolicy::ByRepresentation)
    }

    /// Compute the canonical key of an element.
    ///
    /// `collection_url` is the collection's resolved resource URL, required
    /// by `ByUrl`.
    pub fn canonical_key(
        &self,
        element: &Value,
        collection_url: Option<&ResourceUrl>,
    ) -> Result<String> {
        match self {
            UniquenessPolicy::ByRepresentation => {
                if element.is_mutable() {
                    return Err(CollectionError::MutableElementUnderReprUniqueness);
                }
                Ok(codec::to_canonical_json(element)?)
            }
            UniquenessPolicy::ByUrl => {
                let obj = element
                    .as_object()
                    .ok_or(CollectionError::UrlIdentityRequiresObjects)?;
                let url = obj.url().ok_or(CollectionError::MissingElementUrl)?;
                let collection_url =
                    collection_url.ok_or(CollectionError::UrlUniquenessRequiresPersistedShared)?;
                match collection_url.child_suffix(url) {
                    Some(suffix) => Ok(suffix.to_owned()),
                    None => Err(CollectionError::ElementUrlOutsideCollection {
                        url: url.clone(),
                    }),
                }
            }
            UniquenessPolicy::ByProperty(property) => {
                let obj = element.as_object().ok_or_else(|| {
                    CollectionError::MissingUniquenessProperty {
                        property: property.clone(),
                    }
                })?;
                let prop = obj.get(property).ok_or_else(|| {
                    CollectionError::MissingUniquenessProperty {
                        property: property.clone(),
                    }
                })?;
                Ok(codec::to_canonical_json(&prop)?)
            }
        }
    }

    /// Derive the transport-safe path key for a canonical key. Minted URL
    /// suffixes are already transport-safe and pass through verbatim.
    pub fn path_key_of(&self, canonical_key: &str) -> PathKey {
        match self {
            UniquenessPolicy::ByUrl => PathKey::verbatim(canonical_key)
                .unwrap_or_else(|_| PathKey::hash_of(canonical_key)),
            _ => PathKey::hash_of(canonical_key),
        }
    }

    /// Under `ByUrl`, bind a freshly minted child URL to an element that has
    /// none yet. An element already bound to a URL outside the collection is
    /// rejected.
    pub(crate) fn mint_url_if_needed(
        &self,
        collection_url: &ResourceUrl,
        element: &Value,
    ) -> Result<()> {
        if !matches!(self, UniquenessPolicy::ByUrl) {
            return Ok(());
        }
        let obj = element
            .as_object()
            .ok_or(CollectionError::UrlIdentityRequiresObjects)?;
        if let Some(existing) = obj.url() {
            if collection_url.child_suffix(existing).is_none() {
                return Err(CollectionError::ElementUrlOutsideCollection {
                    url: existing.clone(),
                });
            }
            return Ok(());
        }
        let id = Uuid::now_v7().simple().to_string();
        let url = collection_url
            .join(&id)
            .map_err(|e| reef_value::ValueError::InvalidSerialized(e.to_string()))?;
        obj.bind_url(url)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use reef_value::{ObjectValue, ShapePattern};

    fn obj(id: &str) -> Value {
        Value::Object(ObjectValue::from_entries([("id", Value::Str(id.into()))]).unwrap())
    }

    #[test]
    fn repr_key_is_the_canonical_form() {
        let key = UniquenessPolicy::ByRepresentation
            .canonical_key(&Value::Int(42), None)
            .unwrap();
        assert_eq!(key, "42");
    }

    #[test]
    fn repr_rejects_mutable_elements() {
        let err = UniquenessPolicy::ByRepresentation
            .canonical_key(&obj("a"), None)
            .unwrap_err();
        assert!(matches!(
            err,
            CollectionError::MutableElementUnderReprUniqueness
        ));
    }

    #[test]
    fn property_key_uses_only_the_named_field() {
        let policy = UniquenessPolicy::ByProperty("id".into());
        let a = Value::Object(
            ObjectValue::from_entries([("id", Value::Str("a".into())), ("n", Value::Int(1))])
                .unwrap(),
        );
        let b = Value::Object(
            ObjectValue::from_entries([("id", Value::Str("a".into())), ("n", Value::Int(2))])
                .unwrap(),
        );
        assert_eq!(
            policy.canonical_key(&a, None).unwrap(),
            policy.canonical_key(&b, None).unwrap()
        );
    }

    #[test]
    fn missing_property_is_reported() {
        let policy = UniquenessPolicy::ByProperty("id".into());
        let err = policy
            .canonical_key(&Value::Object(ObjectValue::new()), None)
            .unwrap_err();
        assert!(matches!(
            err,
            CollectionError::MissingUniquenessProperty { .. }
        ));
    }

    #[test]
    fn property_policy_requires_the_shape_to_expose_it() {
        let policy = UniquenessPolicy::ByProperty("id".into());
        let with = ShapePattern::object([("id", ShapePattern::Str)]);
        let without = ShapePattern::object([("name", ShapePattern::Str)]);
        assert!(policy.validate_against_shape(&with).is_ok());
        assert!(matches!(
            policy.validate_against_shape(&without),
            Err(CollectionError::PropertyNotInShape { .. })
        ));
    }

    #[test]
    fn url_key_is_the_child_suffix() {
        let coll = ResourceUrl::parse("ldb://main/users").unwrap();
        let value = obj("a");
        UniquenessPolicy::ByUrl
            .mint_url_if_needed(&coll, &value)
            .unwrap();
        let key = UniquenessPolicy::ByUrl
            .canonical_key(&value, Some(&coll))
            .unwrap();
        assert_eq!(
            value.as_object().unwrap().url().unwrap().as_str(),
            format!("ldb://main/users/{key}")
        );
        // Minting is one-shot: a second call leaves the URL unchanged.
        UniquenessPolicy::ByUrl
            .mint_url_if_needed(&coll, &value)
            .unwrap();
        assert_eq!(
            UniquenessPolicy::ByUrl
                .canonical_key(&value, Some(&coll))
                .unwrap(),
            key
        );
    }

    #[test]
    fn foreign_url_is_rejected() {
        let coll = ResourceUrl::parse("ldb://main/users").unwrap();
        let other = ResourceUrl::parse("ldb://main/messages").unwrap();
        let value = obj("a");
        UniquenessPolicy::ByUrl
            .mint_url_if_needed(&other, &value)
            .unwrap();
        assert!(matches!(
            UniquenessPolicy::ByUrl.mint_url_if_needed(&coll, &value),
            Err(CollectionError::ElementUrlOutsideCollection { .. })
        ));
    }

    #[test]
    fn path_keys_are_transport_safe() {
        let pk = UniquenessPolicy::ByRepresentation.path_key_of(r#"{"a":"/:#?"}"#);
        assert!(pk
            .as_str()
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
    }

    fn immutable_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            "[a-z]{0,8}".prop_map(Value::Str),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop::collection::vec(inner, 0..4).prop_map(Value::Tuple)
        })
    }

    proptest! {
        #[test]
        fn repr_keys_are_deterministic(value in immutable_value()) {
            let policy = UniquenessPolicy::ByRepresentation;
            let k1 = policy.canonical_key(&value, None).unwrap();
            let k2 = policy.canonical_key(&value.deep_clone(), None).unwrap();
            prop_assert_eq!(k1, k2);
        }
    }
}
