use std::collections::BTreeMap;
use std::fmt;

use crate::value::Value;

/// Structural constraint on collection elements.
///
/// Every inserted and every deserialized element is tested against the
/// collection's configured shape; a failing test is a caller-visible error,
/// never a silent skip.
pub trait ElementShape: Send + Sync + fmt::Debug {
    /// Returns `true` if the value matches this shape.
    fn test(&self, value: &Value) -> bool;

    /// The shape of a named property, when this shape constrains one.
    fn property_shape(&self, _name: &str) -> Option<&ShapePattern> {
        None
    }

    /// Returns `true` if values matching this shape always expose the named
    /// property. Required by property-based uniqueness.
    fn has_property(&self, name: &str) -> bool {
        self.property_shape(name).is_some()
    }
}

/// A concrete, composable shape matcher.
#[derive(Clone, Debug)]
pub enum ShapePattern {
    /// Matches any value.
    Any,
    /// Matches any immutable value.
    Immutable,
    Null,
    Bool,
    Int,
    Float,
    Str,
    /// Tuple whose elements all match the inner shape.
    Tuple(Box<ShapePattern>),
    /// Object with at least the given properties, each matching its shape.
    Object(BTreeMap<String, ShapePattern>),
}

impl ShapePattern {
    /// Object shape from `(name, shape)` pairs.
    pub fn object<I, S>(props: I) -> Self
    where
        I: IntoIterator<Item = (S, ShapePattern)>,
        S: Into<String>,
    {
        Self::Object(props.into_iter().map(|(n, s)| (n.into(), s)).collect())
    }
}

impl ElementShape for ShapePattern {
    fn test(&self, value: &Value) -> bool {
        match (self, value) {
            (ShapePattern::Any, _) => true,
            (ShapePattern::Immutable, v) => !v.is_mutable(),
            (ShapePattern::Null, Value::Null) => true,
            (ShapePattern::Bool, Value::Bool(_)) => true,
            (ShapePattern::Int, Value::Int(_)) => true,
            (ShapePattern::Float, Value::Float(_)) => true,
            (ShapePattern::Str, Value::Str(_)) => true,
            (ShapePattern::Tuple(inner), Value::Tuple(items)) => {
                items.iter().all(|item| inner.test(item))
            }
            (ShapePattern::Object(props), Value::Object(obj)) => props
                .iter()
                .all(|(name, shape)| matches!(obj.get(name), Some(v) if shape.test(&v))),
            _ => false,
        }
    }

    fn property_shape(&self, name: &str) -> Option<&ShapePattern> {
        match self {
            ShapePattern::Object(props) => props.get(name),
            _ => None,
        }
    }
}
