//! Storage boundary for Reef.
//!
//! The backing key-value engine is an external collaborator: Reef only
//! requires the narrow [`Storage`] trait (string-oriented get/set/has/insert
//! plus a base resource URL). This crate provides:
//!
//! - [`Storage`] — the trait the persistence adapter writes through
//! - [`MemoryStorage`] — `RwLock<HashMap>` implementation for tests and
//!   embedding
//! - [`StorageRegistry`] — explicit, injected registry of open storage
//!   handles, preventing two handles from claiming the same backing resource

pub mod error;
pub mod memory;
pub mod registry;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStorage;
pub use registry::{RegistryClaim, StorageRegistry};
pub use traits::Storage;
