use std::fmt;

use crate::object::ObjectValue;

/// A dynamically-typed runtime value.
///
/// Scalars and tuples are immutable. [`ObjectValue`] is a mutable property
/// map shared by handle: cloning a `Value::Object` clones the handle, not the
/// contents. A tuple is only immutable as a whole if every element is.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Value>),
    Object(ObjectValue),
}

impl Value {
    /// Returns `true` if the value (or anything reachable from it) can be
    /// mutated after construction.
    pub fn is_mutable(&self) -> bool {
        match self {
            Value::Object(_) => true,
            Value::Tuple(items) => items.iter().any(Value::is_mutable),
            _ => false,
        }
    }

    /// Identity equality: `true` if both values are the *same* value, not
    /// merely structurally equal. Objects compare by handle.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => a.same(b),
            (Value::Object(_), _) | (_, Value::Object(_)) => false,
            _ => self == other,
        }
    }

    /// Structural deep copy. Objects are copied into fresh handles; bound
    /// resource URLs are not carried over.
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::Tuple(items) => Value::Tuple(items.iter().map(Value::deep_clone).collect()),
            Value::Object(obj) => Value::Object(obj.deep_clone()),
            other => other.clone(),
        }
    }

    /// The object handle, if this value is an object.
    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.structural_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Tuple(items) => f.debug_tuple("Tuple").field(items).finish(),
            Value::Object(obj) => obj.fmt(f),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<ObjectValue> for Value {
    fn from(obj: ObjectValue) -> Self {
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_are_immutable() {
        assert!(!Value::Int(1).is_mutable());
        assert!(!Value::Str("a".into()).is_mutable());
        assert!(!Value::Tuple(vec![Value::Int(1), Value::Null]).is_mutable());
    }

    #[test]
    fn objects_are_mutable_even_inside_tuples() {
        let obj = ObjectValue::new();
        assert!(Value::Object(obj.clone()).is_mutable());
        assert!(Value::Tuple(vec![Value::Int(1), Value::Object(obj)]).is_mutable());
    }

    #[test]
    fn same_distinguishes_identity_from_equality() {
        let a = ObjectValue::new();
        a.set("id", Value::Int(1)).unwrap();
        let b = ObjectValue::new();
        b.set("id", Value::Int(1)).unwrap();

        let va = Value::Object(a.clone());
        let vb = Value::Object(b);
        assert_eq!(va, vb);
        assert!(!va.same(&vb));
        assert!(va.same(&Value::Object(a)));

        assert!(Value::Int(3).same(&Value::Int(3)));
        assert!(!Value::Int(3).same(&Value::Int(4)));
    }

    #[test]
    fn deep_clone_detaches_object_handles() {
        let obj = ObjectValue::new();
        obj.set("n", Value::Int(1)).unwrap();
        let v = Value::Object(obj.clone());
        let copy = v.deep_clone();

        obj.set("n", Value::Int(2)).unwrap();
        assert_eq!(copy.as_object().unwrap().get("n"), Some(Value::Int(1)));
        assert!(!copy.same(&v));
    }
}
