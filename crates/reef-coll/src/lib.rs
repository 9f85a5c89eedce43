//! Reef collection engine.
//!
//! Transactional, optionally-shared, optionally-persisted collection types
//! for an embedded dynamically-typed runtime: [`Set`] (canonical),
//! [`MapCollection`], and the append-only [`Thread`]. Each behaves like a
//! miniature embedded database table:
//!
//! - **Uniqueness** — every element has a canonical string key derived under
//!   one of three strategies ([`UniquenessPolicy`])
//! - **Isolation** — once shared, mutations under a transaction land in a
//!   private pending overlay, merged into the base mapping on commit and
//!   discarded on rollback
//! - **Durability** — persisted collections re-save their whole snapshot on
//!   every committed mutation and on every mutation of a stored element
//! - **Migration** — a one-time, path-addressed structural transformation
//!   applied at load, before any persistence hooks attach
//!
//! A collection starts **exclusive** (single owner, transactions ignored) and
//! transitions one way to **shared** ([`Set::share`]), after which all
//! operations are lock-guarded and transaction-aware.

pub mod error;
pub mod gate;
pub mod map;
pub mod migrate;
pub mod overlay;
pub mod persist;
pub mod set;
pub mod thread;
pub mod uniqueness;

pub use error::{CollectionError, MigrationError, Result};
pub use map::{MapCollection, MapConfig, MapEntry};
pub use migrate::{
    Migratable, MigrationHandler, MigrationHandlers, MigrationOutcome, PathPattern,
};
pub use persist::{load_map, load_set, load_thread, LoadOutcome, LoadParams};
pub use set::{Set, SetConfig, SetIter};
pub use thread::{Thread, ThreadConfig};
pub use uniqueness::UniquenessPolicy;
