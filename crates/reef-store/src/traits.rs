use reef_types::{ResourceUrl, StoragePath};

use crate::error::StoreResult;

/// String-oriented key-value storage handle.
///
/// All implementations must satisfy these invariants:
/// - A write is atomic at the single-path level: readers never observe a
///   torn value.
/// - `insert_serialized` fails rather than overwrite.
/// - All I/O errors are propagated, never silently ignored.
/// - The store never interprets stored values — serialization is the
///   caller's concern.
pub trait Storage: Send + Sync {
    /// Read the serialized value stored under `path`.
    ///
    /// Returns `Ok(None)` if nothing is stored there.
    fn get_serialized(&self, path: &StoragePath) -> StoreResult<Option<String>>;

    /// Write (or overwrite) the serialized value under `path`.
    fn set_serialized(&self, path: &StoragePath, serialized: &str) -> StoreResult<()>;

    /// Returns `true` if a value is stored under `path`.
    fn has(&self, path: &StoragePath) -> StoreResult<bool>;

    /// Write the serialized value under `path`, failing with
    /// [`StoreError::AlreadyPresent`] if a value already exists.
    ///
    /// [`StoreError::AlreadyPresent`]: crate::error::StoreError::AlreadyPresent
    fn insert_serialized(&self, path: &StoragePath, serialized: &str) -> StoreResult<()>;

    /// The resource URL identifying this storage handle. Persisted values
    /// stored under `path` resolve to `base_url().join_path(path)`.
    fn base_url(&self) -> &ResourceUrl;
}
