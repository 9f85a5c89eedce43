//! In-memory storage handle for tests and embedding.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use reef_types::{ResourceUrl, StoragePath};

use crate::error::{StoreError, StoreResult};
use crate::registry::{RegistryClaim, StorageRegistry};
use crate::traits::Storage;

/// An in-memory implementation of [`Storage`].
///
/// All data lives in a `HashMap` behind a `RwLock`. Data is lost when the
/// handle is dropped, at which point its registry claim is released too.
pub struct MemoryStorage {
    base_url: ResourceUrl,
    values: RwLock<HashMap<StoragePath, String>>,
    _claim: RegistryClaim,
}

impl MemoryStorage {
    /// Open a new in-memory storage handle, claiming `base_url` in the
    /// registry.
    pub fn open(registry: &StorageRegistry, base_url: ResourceUrl) -> StoreResult<Self> {
        let claim = registry.claim(&base_url)?;
        Ok(Self {
            base_url,
            values: RwLock::new(HashMap::new()),
            _claim: claim,
        })
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.read().expect("lock poisoned").len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.values.read().expect("lock poisoned").is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get_serialized(&self, path: &StoragePath) -> StoreResult<Option<String>> {
        Ok(self.values.read().expect("lock poisoned").get(path).cloned())
    }

    fn set_serialized(&self, path: &StoragePath, serialized: &str) -> StoreResult<()> {
        debug!(path = %path, bytes = serialized.len(), "storing serialized value");
        self.values
            .write()
            .expect("lock poisoned")
            .insert(path.clone(), serialized.to_owned());
        Ok(())
    }

    fn has(&self, path: &StoragePath) -> StoreResult<bool> {
        Ok(self.values.read().expect("lock poisoned").contains_key(path))
    }

    fn insert_serialized(&self, path: &StoragePath, serialized: &str) -> StoreResult<()> {
        let mut values = self.values.write().expect("lock poisoned");
        if values.contains_key(path) {
            return Err(StoreError::AlreadyPresent(path.clone()));
        }
        values.insert(path.clone(), serialized.to_owned());
        Ok(())
    }

    fn base_url(&self) -> &ResourceUrl {
        &self.base_url
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("base_url", &self.base_url)
            .field("value_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> MemoryStorage {
        let registry = StorageRegistry::new();
        MemoryStorage::open(&registry, ResourceUrl::parse("ldb://main").unwrap()).unwrap()
    }

    #[test]
    fn set_then_get() {
        let storage = storage();
        let path = StoragePath::parse("/users").unwrap();

        assert_eq!(storage.get_serialized(&path).unwrap(), None);
        storage.set_serialized(&path, "[]").unwrap();
        assert_eq!(storage.get_serialized(&path).unwrap(), Some("[]".into()));
        assert!(storage.has(&path).unwrap());
    }

    #[test]
    fn insert_fails_on_existing_value() {
        let storage = storage();
        let path = StoragePath::parse("/users").unwrap();

        storage.insert_serialized(&path, "[]").unwrap();
        assert!(matches!(
            storage.insert_serialized(&path, "[1]"),
            Err(StoreError::AlreadyPresent(_))
        ));
        // The original value is untouched.
        assert_eq!(storage.get_serialized(&path).unwrap(), Some("[]".into()));
    }

    #[test]
    fn same_resource_cannot_be_opened_twice() {
        let registry = StorageRegistry::new();
        let url = ResourceUrl::parse("ldb://main").unwrap();
        let first = MemoryStorage::open(&registry, url.clone()).unwrap();
        assert!(MemoryStorage::open(&registry, url.clone()).is_err());
        drop(first);
        assert!(MemoryStorage::open(&registry, url).is_ok());
    }
}
