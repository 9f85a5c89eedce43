//! Foundation types for Reef.
//!
//! This crate provides the identity and addressing types used throughout the
//! Reef collection engine. Every other Reef crate depends on `reef-types`.
//!
//! # Key Types
//!
//! - [`StoragePath`] — Validated logical path of a persisted value inside a
//!   storage handle (`/users`, `/users/messages`)
//! - [`ResourceUrl`] — Resolved resource identifier of a storage handle, a
//!   collection, or an element
//! - [`PathKey`] — Transport-safe alias for a collection element's canonical
//!   key

pub mod error;
pub mod path;
pub mod pathkey;
pub mod url;

pub use error::TypeError;
pub use path::StoragePath;
pub use pathkey::PathKey;
pub use url::ResourceUrl;
