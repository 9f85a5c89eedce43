use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use reef_types::ResourceUrl;

use crate::error::{StoreError, StoreResult};

/// Registry of open storage handles.
///
/// Two live storage handles must never point at the same backing resource;
/// the registry enforces this. It is an explicit value with process-wide
/// lifecycle, injected into storage constructors rather than held as ambient
/// global state. Claims are released when dropped.
#[derive(Clone, Default)]
pub struct StorageRegistry {
    open: Arc<Mutex<HashSet<ResourceUrl>>>,
}

impl StorageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a backing resource for a new storage handle.
    pub fn claim(&self, base_url: &ResourceUrl) -> StoreResult<RegistryClaim> {
        let mut open = self.open.lock().expect("lock poisoned");
        if !open.insert(base_url.clone()) {
            return Err(StoreError::ResourceAlreadyOpen(base_url.clone()));
        }
        Ok(RegistryClaim {
            registry: self.open.clone(),
            base_url: base_url.clone(),
        })
    }

    /// Returns `true` if the resource is currently claimed.
    pub fn is_open(&self, base_url: &ResourceUrl) -> bool {
        self.open.lock().expect("lock poisoned").contains(base_url)
    }
}

/// Exclusive claim on a backing resource, released on drop.
pub struct RegistryClaim {
    registry: Arc<Mutex<HashSet<ResourceUrl>>>,
    base_url: ResourceUrl,
}

impl Drop for RegistryClaim {
    fn drop(&mut self) {
        self.registry
            .lock()
            .expect("lock poisoned")
            .remove(&self.base_url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_claim_is_rejected() {
        let registry = StorageRegistry::new();
        let url = ResourceUrl::parse("ldb://main").unwrap();

        let claim = registry.claim(&url).unwrap();
        assert!(matches!(
            registry.claim(&url),
            Err(StoreError::ResourceAlreadyOpen(_))
        ));
        assert!(registry.is_open(&url));

        drop(claim);
        assert!(!registry.is_open(&url));
        assert!(registry.claim(&url).is_ok());
    }

    #[test]
    fn distinct_resources_do_not_conflict() {
        let registry = StorageRegistry::new();
        let a = registry.claim(&ResourceUrl::parse("ldb://a").unwrap()).unwrap();
        let b = registry.claim(&ResourceUrl::parse("ldb://b").unwrap()).unwrap();
        drop((a, b));
    }
}
