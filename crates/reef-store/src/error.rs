use reef_types::{ResourceUrl, StoragePath};

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No value is stored under the given path.
    #[error("no value stored at {0}")]
    NotFound(StoragePath),

    /// `insert_serialized` found an existing value.
    #[error("a value is already stored at {0}")]
    AlreadyPresent(StoragePath),

    /// Another handle already claims the backing resource.
    #[error("storage resource already open: {0}")]
    ResourceAlreadyOpen(ResourceUrl),

    /// I/O error from the underlying storage engine.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
