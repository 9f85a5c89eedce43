//! Canonical JSON codec.
//!
//! The canonical form serves two purposes: it is the persisted snapshot
//! encoding, and it is the identity function for representation-based
//! uniqueness. Object properties serialize in sorted order, so equal values
//! always produce byte-equal canonical forms.
//!
//! A mutable object's bound resource URL is carried in the reserved
//! `_url_` metadata key so that URL-identified elements keep their identity
//! across save/load.

use serde_json::{Map, Number};

use reef_types::ResourceUrl;

use crate::error::ValueError;
use crate::object::{ObjectValue, URL_METADATA_KEY};
use crate::shape::ElementShape;
use crate::value::Value;

/// Serialize a value to its canonical JSON form.
pub fn to_canonical_json(value: &Value) -> Result<String, ValueError> {
    let json = to_json_value(value)?;
    Ok(serde_json::to_string(&json)?)
}

/// Deserialize a canonical form and validate it against a shape constraint.
pub fn deserialize_checked(
    serialized: &str,
    shape: &dyn ElementShape,
) -> Result<Value, ValueError> {
    let json: serde_json::Value = serde_json::from_str(serialized)?;
    let value = from_json_value(json)?;
    if !shape.test(&value) {
        return Err(ValueError::ShapeMismatch);
    }
    Ok(value)
}

/// Convert a runtime value to a JSON tree.
pub fn to_json_value(value: &Value) -> Result<serde_json::Value, ValueError> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::Float(x) => serde_json::Value::Number(
            Number::from_f64(*x)
                .ok_or_else(|| ValueError::InvalidSerialized("non-finite float".into()))?,
        ),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Tuple(items) => serde_json::Value::Array(
            items.iter().map(to_json_value).collect::<Result<_, _>>()?,
        ),
        Value::Object(obj) => {
            let mut map = Map::new();
            if let Some(url) = obj.url() {
                map.insert(
                    URL_METADATA_KEY.to_owned(),
                    serde_json::Value::String(url.as_str().to_owned()),
                );
            }
            for (name, prop) in obj.entries() {
                map.insert(name, to_json_value(&prop)?);
            }
            serde_json::Value::Object(map)
        }
    })
}

/// Convert a JSON tree back into a runtime value.
///
/// JSON objects become mutable [`ObjectValue`]s; JSON arrays become
/// immutable-by-construction tuples. A `_url_` metadata key re-binds the
/// object's resource URL.
pub fn from_json_value(json: serde_json::Value) -> Result<Value, ValueError> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(x) = n.as_f64() {
                Value::Float(x)
            } else {
                return Err(ValueError::InvalidSerialized(format!(
                    "unrepresentable number: {n}"
                )));
            }
        }
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => Value::Tuple(
            items
                .into_iter()
                .map(from_json_value)
                .collect::<Result<_, _>>()?,
        ),
        serde_json::Value::Object(map) => {
            let obj = ObjectValue::new();
            for (name, prop) in map {
                if name == URL_METADATA_KEY {
                    let serde_json::Value::String(url) = prop else {
                        return Err(ValueError::InvalidSerialized(
                            "URL metadata must be a string".into(),
                        ));
                    };
                    let url = ResourceUrl::parse(&url)
                        .map_err(|e| ValueError::InvalidSerialized(e.to_string()))?;
                    obj.bind_url(url)?;
                } else {
                    obj.set(name, from_json_value(prop)?)?;
                }
            }
            Value::Object(obj)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::ShapePattern;

    #[test]
    fn canonical_form_is_sorted_and_stable() {
        let obj = ObjectValue::from_entries([
            ("zeta", Value::Int(1)),
            ("alpha", Value::Str("x".into())),
        ])
        .unwrap();
        let s = to_canonical_json(&Value::Object(obj)).unwrap();
        assert_eq!(s, r#"{"alpha":"x","zeta":1}"#);
    }

    #[test]
    fn equal_values_produce_equal_canonical_forms() {
        let a = ObjectValue::from_entries([("id", Value::Str("a".into()))]).unwrap();
        let b = ObjectValue::from_entries([("id", Value::Str("a".into()))]).unwrap();
        assert_eq!(
            to_canonical_json(&Value::Object(a)).unwrap(),
            to_canonical_json(&Value::Object(b)).unwrap()
        );
    }

    #[test]
    fn roundtrip_preserves_structure() {
        let obj = ObjectValue::from_entries([
            ("n", Value::Int(42)),
            ("t", Value::Tuple(vec![Value::Bool(true), Value::Null])),
        ])
        .unwrap();
        let s = to_canonical_json(&Value::Object(obj.clone())).unwrap();
        let back = deserialize_checked(&s, &ShapePattern::Any).unwrap();
        assert_eq!(back, Value::Object(obj));
    }

    #[test]
    fn url_metadata_survives_roundtrip() {
        let obj = ObjectValue::from_entries([("n", Value::Int(1))]).unwrap();
        let url = ResourceUrl::parse("ldb://main/users/k1").unwrap();
        obj.bind_url(url.clone()).unwrap();

        let s = to_canonical_json(&Value::Object(obj)).unwrap();
        let back = deserialize_checked(&s, &ShapePattern::Any).unwrap();
        assert_eq!(back.as_object().unwrap().url(), Some(&url));
        // Metadata is not exposed as a property.
        assert!(!back.as_object().unwrap().has_property("_url_"));
    }

    #[test]
    fn shape_violation_is_reported() {
        let err = deserialize_checked("3", &ShapePattern::Str).unwrap_err();
        assert!(matches!(err, ValueError::ShapeMismatch));
    }

    #[test]
    fn non_finite_floats_are_rejected() {
        assert!(to_canonical_json(&Value::Float(f64::NAN)).is_err());
    }
}
