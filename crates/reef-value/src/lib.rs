//! Dynamic value model for Reef.
//!
//! This crate provides the runtime values that Reef collections store, the
//! shape constraints used to validate them, and the canonical serialization
//! codec used both for durability and for representation-based identity.
//!
//! - [`Value`] — Dynamically-typed value: scalars and tuples are immutable,
//!   [`ObjectValue`] is mutable and shared by handle
//! - [`ObjectValue`] — Mutable property map with one-shot resource-URL
//!   binding and mutation watchers
//! - [`ElementShape`] / [`ShapePattern`] — Structural constraint tested
//!   against every inserted or deserialized element
//! - [`codec`] — Canonical JSON encoding: equal values always produce equal
//!   canonical forms

pub mod codec;
pub mod error;
pub mod object;
pub mod shape;
pub mod value;

pub use error::ValueError;
pub use object::{ObjectValue, WatcherHandle};
pub use shape::{ElementShape, ShapePattern};
pub use value::Value;
