use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Logical path of a persisted value inside a storage handle.
///
/// A `StoragePath` is an absolute, `/`-separated path with non-empty
/// segments, e.g. `/users` or `/app/messages`. It addresses one snapshot in
/// the backing key-value store and doubles as the anchor that migration path
/// patterns are matched against.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoragePath(String);

impl StoragePath {
    /// Parse and validate a storage path.
    ///
    /// The path must start with `/` and contain no empty segments.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        if !s.starts_with('/') {
            return Err(TypeError::InvalidPath(format!(
                "path must be absolute: {s}"
            )));
        }
        if s.len() > 1 && s.ends_with('/') {
            return Err(TypeError::InvalidPath(format!(
                "path must not end with a slash: {s}"
            )));
        }
        if s[1..].split('/').any(|seg| seg.is_empty()) && s != "/" {
            return Err(TypeError::InvalidPath(format!("empty path segment: {s}")));
        }
        Ok(Self(s.to_owned()))
    }

    /// The path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path's segments, in order. The root path `/` has no segments.
    pub fn segments(&self) -> Vec<&str> {
        if self.0 == "/" {
            return Vec::new();
        }
        self.0[1..].split('/').collect()
    }

    /// Number of segments (structural depth).
    pub fn depth(&self) -> usize {
        self.segments().len()
    }

    /// Append one segment, producing a child path.
    pub fn join(&self, segment: &str) -> Result<Self, TypeError> {
        if segment.is_empty() || segment.contains('/') {
            return Err(TypeError::InvalidPath(format!(
                "invalid path segment: {segment}"
            )));
        }
        if self.0 == "/" {
            Ok(Self(format!("/{segment}")))
        } else {
            Ok(Self(format!("{}/{segment}", self.0)))
        }
    }

    /// Returns `true` if `other` is this path or a descendant of it.
    pub fn contains(&self, other: &StoragePath) -> bool {
        other.0 == self.0 || other.0.starts_with(&format!("{}/", self.0))
    }
}

impl fmt::Debug for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoragePath({})", self.0)
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
