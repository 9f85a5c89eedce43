use reef_types::{ResourceUrl, StoragePath};

/// Errors produced by collection operations.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    /// The element does not match the collection's shape constraint.
    #[error("element does not match the collection's element shape")]
    ShapeViolation,

    /// A different element with the same canonical key is already present
    /// (or pending in the same transaction).
    #[error("a different element with the same key is already present: {key}")]
    UniquenessViolation { key: String },

    /// Representation-based identity requires immutable elements.
    #[error("representation-based uniqueness requires immutable elements")]
    MutableElementUnderReprUniqueness,

    /// Map keys must be immutable.
    #[error("map keys must be immutable")]
    MutableMapKey,

    /// The element is missing the property configured for uniqueness.
    #[error("element is missing the uniqueness property: {property}")]
    MissingUniquenessProperty { property: String },

    /// The configured element shape does not expose the uniqueness property.
    #[error("property used for uniqueness is not present in the element shape: {property}")]
    PropertyNotInShape { property: String },

    /// URL-based identity requires a persisted, shared collection.
    #[error("URL uniqueness is only supported on a persisted, shared collection")]
    UrlUniquenessRequiresPersistedShared,

    /// URL-based identity requires object elements.
    #[error("URL uniqueness requires object elements")]
    UrlIdentityRequiresObjects,

    /// The element has no resource identifier to derive a key from.
    #[error("element has no resource identifier")]
    MissingElementUrl,

    /// The element's resource identifier belongs to a different container.
    #[error("element URL is scoped to a different container: {url}")]
    ElementUrlOutsideCollection { url: ResourceUrl },

    /// No element with the given path key.
    #[error("collection element not found")]
    ElementNotFound,

    /// No snapshot stored at the path and `allow_missing` was false.
    #[error("no snapshot stored at {path}")]
    SnapshotNotFound { path: StoragePath },

    /// The stored snapshot cannot be loaded. This is a corruption signal,
    /// not a normal runtime path.
    #[error("corrupt snapshot at {path}: {reason}")]
    CorruptSnapshot { path: StoragePath, reason: String },

    /// The collection is already bound to a storage location.
    #[error("collection is already persisted")]
    AlreadyPersisted,

    #[error(transparent)]
    Value(#[from] reef_value::ValueError),

    #[error(transparent)]
    Store(#[from] reef_store::StoreError),

    #[error(transparent)]
    Tx(#[from] reef_txn::TxError),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Errors produced by the migration engine.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// The path pattern does not resolve to an existing value.
    #[error("no value at migration target: {pattern}")]
    TargetNotFound { pattern: String },

    /// The addressed value cannot recurse into a nested migration.
    #[error("value at {pattern} is not migration-capable")]
    NotMigrationCapable { pattern: String },

    /// The operation is invalid at this structural depth (for example,
    /// including an element into an identity-derived collection by slot).
    #[error("unsupported migration operation at {pattern}: {reason}")]
    UnsupportedOperation { pattern: String, reason: String },

    /// Migration ran while a transaction had uncommitted changes.
    #[error("cannot migrate a collection with pending transactional changes")]
    PendingChanges,

    /// A value-producing handler failed.
    #[error("migration handler failed: {0}")]
    Handler(String),

    /// Re-deriving the canonical key of a migrated element failed.
    #[error("failed to re-key migrated element: {0}")]
    Rekey(String),

    /// A path pattern is malformed.
    #[error("invalid migration path pattern: {0}")]
    InvalidPattern(String),
}

/// Result alias for collection operations.
pub type Result<T> = std::result::Result<T, CollectionError>;
