use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Transport-safe alias for a collection element's canonical key.
///
/// Canonical keys can be arbitrary serialized values, which makes them
/// unsuitable for use in paths or URLs. A `PathKey` is a stable token derived
/// from the canonical key: the hex-encoded BLAKE3 digest of the key bytes,
/// or — when the key is already a minted, URL-safe identifier — the key
/// itself.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathKey(String);

impl PathKey {
    /// Derive a path key from an arbitrary canonical key by hashing it.
    pub fn hash_of(canonical_key: &str) -> Self {
        Self(hex::encode(blake3::hash(canonical_key.as_bytes()).as_bytes()))
    }

    /// Use a minted identifier verbatim as the path key.
    ///
    /// The identifier must already be transport-safe: non-empty ASCII
    /// alphanumerics plus `-` and `_`.
    pub fn verbatim(id: &str) -> Result<Self, TypeError> {
        if id.is_empty()
            || !id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(TypeError::InvalidPathKey(id.to_owned()));
        }
        Ok(Self(id.to_owned()))
    }

    /// The token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathKey({})", self.0)
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
