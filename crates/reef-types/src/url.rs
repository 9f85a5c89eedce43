use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::path::StoragePath;

/// Resolved resource identifier.
///
/// A `ResourceUrl` names a storage handle (`ldb://main`), a persisted
/// collection (`ldb://main/users`), or an element of a URL-identified
/// collection (`ldb://main/users/<id>`). Element URLs are always direct
/// children of their collection's URL; the trailing segment is the element's
/// canonical key under URL identity.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceUrl(String);

impl ResourceUrl {
    /// Parse and validate a resource URL of the form `scheme://host[/path]`.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let Some((scheme, rest)) = s.split_once("://") else {
            return Err(TypeError::InvalidUrl(format!("missing scheme: {s}")));
        };
        if scheme.is_empty() || rest.is_empty() {
            return Err(TypeError::InvalidUrl(s.to_owned()));
        }
        if rest.ends_with('/') || rest.split('/').any(|seg| seg.is_empty()) {
            return Err(TypeError::InvalidUrl(format!("empty segment in: {s}")));
        }
        Ok(Self(s.to_owned()))
    }

    /// The URL as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Append a storage path, producing the URL of a value stored under it.
    pub fn join_path(&self, path: &StoragePath) -> Self {
        if path.as_str() == "/" {
            self.clone()
        } else {
            Self(format!("{}{}", self.0, path))
        }
    }

    /// Append one segment, producing a child URL.
    pub fn join(&self, segment: &str) -> Result<Self, TypeError> {
        if segment.is_empty() || segment.contains('/') {
            return Err(TypeError::InvalidUrl(format!(
                "invalid URL segment: {segment}"
            )));
        }
        Ok(Self(format!("{}/{segment}", self.0)))
    }

    /// Returns `true` if `other` is a direct child of this URL.
    pub fn is_direct_parent_of(&self, other: &ResourceUrl) -> bool {
        match other.0.strip_prefix(&self.0) {
            Some(rest) => {
                rest.len() > 1 && rest.starts_with('/') && !rest[1..].contains('/')
            }
            None => false,
        }
    }

    /// The trailing segment of `other` relative to this URL, if `other` is a
    /// direct child.
    pub fn child_suffix<'a>(&self, other: &'a ResourceUrl) -> Option<&'a str> {
        if self.is_direct_parent_of(other) {
            Some(&other.0[self.0.len() + 1..])
        } else {
            None
        }
    }
}

impl fmt::Debug for ResourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceUrl({})", self.0)
    }
}

impl fmt::Display for ResourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_requires_scheme_and_host() {
        assert!(ResourceUrl::parse("ldb://main").is_ok());
        assert!(ResourceUrl::parse("ldb://main/users").is_ok());
        assert!(ResourceUrl::parse("main/users").is_err());
        assert!(ResourceUrl::parse("ldb://").is_err());
        assert!(ResourceUrl::parse("ldb://main/").is_err());
    }

    #[test]
    fn join_path_appends_storage_path() {
        let base = ResourceUrl::parse("ldb://main").unwrap();
        let path = StoragePath::parse("/users").unwrap();
        assert_eq!(base.join_path(&path).as_str(), "ldb://main/users");
        let root = StoragePath::parse("/").unwrap();
        assert_eq!(base.join_path(&root), base);
    }

    #[test]
    fn direct_parent_and_child_suffix() {
        let coll = ResourceUrl::parse("ldb://main/users").unwrap();
        let elem = coll.join("abc123").unwrap();
        let deep = elem.join("x").unwrap();
        assert!(coll.is_direct_parent_of(&elem));
        assert!(!coll.is_direct_parent_of(&deep));
        assert!(!coll.is_direct_parent_of(&coll));
        assert_eq!(coll.child_suffix(&elem), Some("abc123"));
        assert_eq!(coll.child_suffix(&deep), None);
    }
}
