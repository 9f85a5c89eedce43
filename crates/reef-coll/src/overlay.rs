//! Per-transaction pending overlays.
//!
//! An overlay is a transaction's private, uncommitted view of a collection:
//! pending inclusions (canonical key → payload) and pending removals (keys).
//! Overlays live in a side-table keyed by transaction id, owned by the
//! collection, and are removed deterministically when the transaction ends —
//! merged on commit, discarded on rollback.

use std::collections::{HashMap, HashSet};

use reef_txn::TransactionId;

/// A single transaction's pending changes. A key never appears in both the
/// inclusion map and the removal set.
#[derive(Debug)]
pub(crate) struct Overlay<E> {
    inclusions: HashMap<String, E>,
    removals: HashSet<String>,
}

impl<E> Default for Overlay<E> {
    fn default() -> Self {
        Self {
            inclusions: HashMap::new(),
            removals: HashSet::new(),
        }
    }
}

/// Resolution of one key against an overlay.
pub(crate) enum OverlayHit<'a, E> {
    /// The transaction has a pending removal for the key.
    Removed,
    /// The transaction has a pending inclusion for the key.
    Included(&'a E),
    /// The overlay says nothing about the key.
    Miss,
}

impl<E> Overlay<E> {
    /// Record a pending inclusion, clearing any pending removal of the key.
    /// An existing pending inclusion for the key is kept.
    pub(crate) fn include(&mut self, key: String, payload: E) {
        self.removals.remove(&key);
        self.inclusions.entry(key).or_insert(payload);
    }

    /// Record a pending removal, clearing any pending inclusion of the key.
    pub(crate) fn remove(&mut self, key: String) {
        self.inclusions.remove(&key);
        self.removals.insert(key);
    }

    pub(crate) fn resolve(&self, key: &str) -> OverlayHit<'_, E> {
        if self.removals.contains(key) {
            OverlayHit::Removed
        } else if let Some(payload) = self.inclusions.get(key) {
            OverlayHit::Included(payload)
        } else {
            OverlayHit::Miss
        }
    }

    pub(crate) fn pending_inclusion(&self, key: &str) -> Option<&E> {
        self.inclusions.get(key)
    }

    pub(crate) fn inclusions(&self) -> impl Iterator<Item = (&String, &E)> {
        self.inclusions.iter()
    }

    pub(crate) fn removals(&self) -> impl Iterator<Item = &String> {
        self.removals.iter()
    }

    pub(crate) fn into_parts(self) -> (HashMap<String, E>, HashSet<String>) {
        (self.inclusions, self.removals)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inclusions.is_empty() && self.removals.is_empty()
    }
}

/// Side-table of overlays, one per in-flight transaction.
#[derive(Debug)]
pub(crate) struct OverlayTable<E> {
    overlays: HashMap<TransactionId, Overlay<E>>,
}

impl<E> Default for OverlayTable<E> {
    fn default() -> Self {
        Self {
            overlays: HashMap::new(),
        }
    }
}

impl<E> OverlayTable<E> {
    /// The overlay of a transaction, if it has pending changes.
    pub(crate) fn of(&self, tx: TransactionId) -> Option<&Overlay<E>> {
        self.overlays.get(&tx)
    }

    /// The overlay of a transaction, created lazily on first mutation.
    pub(crate) fn of_mut(&mut self, tx: TransactionId) -> &mut Overlay<E> {
        self.overlays.entry(tx).or_default()
    }

    /// Detach a transaction's overlay at end of transaction.
    pub(crate) fn take(&mut self, tx: TransactionId) -> Option<Overlay<E>> {
        self.overlays.remove(&tx)
    }

    /// Returns `true` if any transaction has pending changes.
    pub(crate) fn any_pending(&self) -> bool {
        self.overlays.values().any(|ov| !ov.is_empty())
    }

    /// Returns `true` if any transaction has a pending change for the key.
    pub(crate) fn any_pending_for(&self, key: &str) -> bool {
        self.overlays
            .values()
            .any(|ov| !matches!(ov.resolve(key), OverlayHit::Miss))
    }
}
