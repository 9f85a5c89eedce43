//! The `Set` collection — the canonical collection type.
//!
//! A `Set` owns a base mapping from canonical key to element. It starts
//! exclusive (single owner, transactions ignored, no gate) and transitions
//! one way to shared via [`Set::share`], after which every operation is
//! lock-guarded and transaction-aware:
//!
//! - mutations without a transaction apply directly and persist immediately
//! - mutations under a transaction land in that transaction's pending
//!   overlay and become visible to others only when it commits
//! - reads resolve pending removal → pending inclusion → base mapping
//!
//! A transaction's first mutating call claims the collection's writer gate;
//! other transactions' mutating calls block until the end-of-transaction
//! callback merges (or discards) the overlay and releases the gate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tracing::warn;

use reef_store::Storage;
use reef_txn::{RegistrantId, Transaction, TransactionId};
use reef_types::{PathKey, ResourceUrl, StoragePath};
use reef_value::{ElementShape, Value};

use crate::error::{CollectionError, Result};
use crate::gate::{SharingState, TxGate};
use crate::overlay::{OverlayHit, OverlayTable};
use crate::persist;
use crate::uniqueness::UniquenessPolicy;

/// Configuration of a [`Set`]: the element shape constraint and the identity
/// strategy. Both are fixed for the collection's lifetime.
#[derive(Clone)]
pub struct SetConfig {
    pub element_shape: Arc<dyn ElementShape>,
    pub uniqueness: UniquenessPolicy,
}

impl SetConfig {
    pub fn new(element_shape: Arc<dyn ElementShape>, uniqueness: UniquenessPolicy) -> Self {
        Self {
            element_shape,
            uniqueness,
        }
    }
}

/// A transactional set of unique elements. Clones share the same collection.
#[derive(Clone)]
pub struct Set {
    pub(crate) inner: Arc<SetInner>,
}

pub(crate) struct SetInner {
    pub(crate) registrant: RegistrantId,
    pub(crate) config: SetConfig,
    pub(crate) sharing: SharingState,
    pub(crate) gate: TxGate,
    pub(crate) state: Mutex<SetState>,
    pub(crate) binding: OnceLock<persist::Binding>,
}

#[derive(Default)]
pub(crate) struct SetState {
    pub(crate) elements: HashMap<String, Value>,
    pub(crate) overlays: OverlayTable<Value>,
    end_registered: std::collections::HashSet<TransactionId>,
    /// Lazily-built bidirectional alias index, `None` until the first
    /// external lookup.
    pub(crate) path_keys: Option<HashMap<PathKey, String>>,
}

impl SetState {
    pub(crate) fn insert_element(&mut self, policy: &UniquenessPolicy, key: String, value: Value) {
        if let Some(index) = self.path_keys.as_mut() {
            index.insert(policy.path_key_of(&key), key.clone());
        }
        self.elements.insert(key, value);
    }

    pub(crate) fn remove_element(&mut self, policy: &UniquenessPolicy, key: &str) {
        if let Some(index) = self.path_keys.as_mut() {
            index.remove(&policy.path_key_of(key));
        }
        self.elements.remove(key);
    }

    fn ensure_path_key_index(&mut self, policy: &UniquenessPolicy) {
        if self.path_keys.is_none() {
            let index = self
                .elements
                .keys()
                .map(|key| (policy.path_key_of(key), key.clone()))
                .collect();
            self.path_keys = Some(index);
        }
    }
}

impl Set {
    /// Create a new, empty, exclusive set.
    pub fn new(config: SetConfig) -> Result<Self> {
        config
            .uniqueness
            .validate_against_shape(config.element_shape.as_ref())?;
        Ok(Self {
            inner: Arc::new(SetInner {
                registrant: RegistrantId::new(),
                config,
                sharing: SharingState::default(),
                gate: TxGate::default(),
                state: Mutex::new(SetState::default()),
                binding: OnceLock::new(),
            }),
        })
    }

    /// Create an exclusive set from an initial sequence of elements.
    pub fn with_elements<I>(config: SetConfig, elements: I) -> Result<Self>
    where
        I: IntoIterator<Item = Value>,
    {
        let set = Self::new(config)?;
        for element in elements {
            set.add(None, element)?;
        }
        Ok(set)
    }

    /// Promote the set to shared mode. Irreversible; after this call the set
    /// may be used from multiple execution contexts.
    pub fn share(&self) {
        self.inner.sharing.share();
    }

    /// Returns `true` once the set has been shared.
    pub fn is_shared(&self) -> bool {
        self.inner.sharing.is_shared()
    }

    /// The set's resolved resource URL, if it is persisted.
    pub fn url(&self) -> Option<&ResourceUrl> {
        self.inner.binding.get().map(|b| &b.url)
    }

    /// The identity strategy.
    pub fn uniqueness(&self) -> &UniquenessPolicy {
        &self.inner.config.uniqueness
    }

    /// Add an element.
    ///
    /// Collision policy: an element equal (by identity for identity-sensitive
    /// strategies, by value otherwise) to a present one is a no-op; a
    /// *different* element with the same canonical key is a uniqueness
    /// violation.
    pub fn add(&self, tx: Option<&Transaction>, element: Value) -> Result<()> {
        let inner = &self.inner;
        inner.assert_url_preconditions()?;
        if !inner.config.element_shape.test(&element) {
            return Err(CollectionError::ShapeViolation);
        }

        if !inner.sharing.is_shared() {
            // Exclusive: no gate, transactions ignored.
            let key = inner.canonical_key(&element)?;
            let mut state = inner.lock_state();
            if let Some(present) = state.elements.get(&key) {
                if inner.config.uniqueness.is_identity_sensitive() && !present.same(&element) {
                    return Err(CollectionError::UniquenessViolation { key });
                }
                return Ok(());
            }
            state.insert_element(&inner.config.uniqueness, key, element);
            return Ok(());
        }

        match tx {
            None => {
                inner.gate.wait_until_free();
                inner.mint_url_if_needed(&element)?;
                let key = inner.canonical_key(&element)?;
                let watch = (inner.binding.get().is_some() && element.is_mutable())
                    .then(|| element.clone());
                {
                    let mut state = inner.lock_state();
                    if let Some(present) = state.elements.get(&key) {
                        if inner.config.uniqueness.is_identity_sensitive()
                            && !present.same(&element)
                        {
                            return Err(CollectionError::UniquenessViolation { key });
                        }
                        return Ok(());
                    }
                    state.insert_element(&inner.config.uniqueness, key.clone(), element);
                }
                inner.persist_now()?;
                if let Some(watched) = watch {
                    persist::attach_set_element_watcher(inner, key, &watched);
                }
                Ok(())
            }
            Some(tx) => {
                inner.gate.acquire(tx.id());
                self.ensure_end_callback(tx)?;
                inner.mint_url_if_needed(&element)?;
                let key = inner.canonical_key(&element)?;

                let mut state = inner.lock_state();
                if let Some(present) = state.elements.get(&key) {
                    if inner.config.uniqueness.is_identity_sensitive() && !present.same(&element)
                    {
                        return Err(CollectionError::UniquenessViolation { key });
                    }
                }
                if let Some(pending) = state.overlays.of_mut(tx.id()).pending_inclusion(&key) {
                    if !pending.same(&element) {
                        return Err(CollectionError::UniquenessViolation { key });
                    }
                }
                // The alias index follows the base mapping only; the merge
                // at end of transaction indexes committed inclusions.
                state.overlays.of_mut(tx.id()).include(key, element);
                Ok(())
            }
        }
    }

    /// Remove an element.
    ///
    /// Removing with an element that merely shares a key but differs in
    /// identity is a safe no-op, so idempotent retries stay cheap.
    pub fn remove(&self, tx: Option<&Transaction>, element: &Value) -> Result<()> {
        let inner = &self.inner;
        inner.assert_url_preconditions()?;
        if !inner.config.element_shape.test(element) {
            return Err(CollectionError::ShapeViolation);
        }

        if !inner.sharing.is_shared() {
            let key = inner.canonical_key(element)?;
            let mut state = inner.lock_state();
            match state.elements.get(&key) {
                None => return Ok(()),
                Some(present)
                    if inner.config.uniqueness.is_identity_sensitive()
                        && !present.same(element) =>
                {
                    return Ok(());
                }
                Some(_) => state.remove_element(&inner.config.uniqueness, &key),
            }
            return Ok(());
        }

        match tx {
            None => {
                inner.gate.wait_until_free();
                let key = inner.canonical_key(element)?;
                let removed = {
                    let mut state = inner.lock_state();
                    match state.elements.get(&key) {
                        None => false,
                        Some(present)
                            if inner.config.uniqueness.is_identity_sensitive()
                                && !present.same(element) =>
                        {
                            false
                        }
                        Some(_) => {
                            state.remove_element(&inner.config.uniqueness, &key);
                            true
                        }
                    }
                };
                if removed {
                    inner.persist_now()?;
                }
                Ok(())
            }
            Some(tx) => {
                inner.gate.acquire(tx.id());
                self.ensure_end_callback(tx)?;
                let key = inner.canonical_key(element)?;

                let mut state = inner.lock_state();
                // Identity-sensitive no-op: the visible value under this key
                // is a different element.
                let visible_differs = match state.overlays.of(tx.id()).map(|ov| ov.resolve(&key))
                {
                    Some(OverlayHit::Removed) => false,
                    Some(OverlayHit::Included(pending)) => {
                        inner.config.uniqueness.is_identity_sensitive() && !pending.same(element)
                    }
                    _ => match state.elements.get(&key) {
                        Some(present) => {
                            inner.config.uniqueness.is_identity_sensitive()
                                && !present.same(element)
                        }
                        None => false,
                    },
                };
                if visible_differs {
                    return Ok(());
                }
                state.overlays.of_mut(tx.id()).remove(key);
                Ok(())
            }
        }
    }

    /// Returns `true` if the element is present from the caller's point of
    /// view (the calling transaction's overlay first, then the base mapping).
    pub fn has(&self, tx: Option<&Transaction>, element: &Value) -> Result<bool> {
        let inner = &self.inner;
        inner.assert_url_preconditions()?;
        if !inner.config.element_shape.test(element) {
            return Err(CollectionError::ShapeViolation);
        }
        let key = inner.canonical_key(element)?;
        let state = inner.lock_state();
        let identity = inner.config.uniqueness.is_identity_sensitive();

        if let Some(tx) = tx.filter(|_| inner.sharing.is_shared()) {
            if let Some(overlay) = state.overlays.of(tx.id()) {
                match overlay.resolve(&key) {
                    OverlayHit::Removed => return Ok(false),
                    OverlayHit::Included(pending) => {
                        return Ok(!identity || pending.same(element));
                    }
                    OverlayHit::Miss => {}
                }
            }
        }
        Ok(match state.elements.get(&key) {
            Some(present) => !identity || present.same(element),
            None => false,
        })
    }

    /// Look up an element by its canonical key.
    pub fn get(&self, tx: Option<&Transaction>, canonical_key: &str) -> Result<Option<Value>> {
        let inner = &self.inner;
        inner.assert_url_preconditions()?;
        let state = inner.lock_state();
        Ok(Self::resolve(inner, &state, tx, canonical_key))
    }

    /// Look up an element by its transport-safe path key. The alias index is
    /// built lazily on the first call.
    pub fn get_by_path_key(&self, tx: Option<&Transaction>, path_key: &PathKey) -> Result<Value> {
        let inner = &self.inner;
        inner.assert_url_preconditions()?;
        let mut state = inner.lock_state();
        state.ensure_path_key_index(&inner.config.uniqueness);
        let key = state
            .path_keys
            .as_ref()
            .and_then(|index| index.get(path_key))
            .cloned()
            .ok_or(CollectionError::ElementNotFound)?;
        Self::resolve(inner, &state, tx, &key).ok_or(CollectionError::ElementNotFound)
    }

    /// Number of elements visible to the caller.
    pub fn len(&self, tx: Option<&Transaction>) -> Result<usize> {
        let inner = &self.inner;
        inner.assert_url_preconditions()?;
        let state = inner.lock_state();
        let overlay = tx
            .filter(|_| inner.sharing.is_shared())
            .and_then(|tx| state.overlays.of(tx.id()));
        let mut count = 0usize;
        for key in state.elements.keys() {
            let removed = matches!(
                overlay.map(|ov| ov.resolve(key)),
                Some(OverlayHit::Removed)
            );
            if !removed {
                count += 1;
            }
        }
        if let Some(overlay) = overlay {
            count += overlay
                .inclusions()
                .filter(|(key, _)| !state.elements.contains_key(*key))
                .count();
        }
        Ok(count)
    }

    /// Returns `true` if no element is visible to the caller.
    pub fn is_empty(&self, tx: Option<&Transaction>) -> Result<bool> {
        Ok(self.len(tx)? == 0)
    }

    /// A point-in-time snapshot iterator.
    ///
    /// The snapshot is taken atomically at call time: the base mapping with
    /// the calling transaction's pending removals subtracted and pending
    /// inclusions added. Later mutations are not observed; call `iter` again
    /// to see them.
    pub fn iter(&self, tx: Option<&Transaction>) -> Result<SetIter> {
        let inner = &self.inner;
        inner.assert_url_preconditions()?;
        let state = inner.lock_state();
        let overlay = tx
            .filter(|_| inner.sharing.is_shared())
            .and_then(|tx| state.overlays.of(tx.id()));

        let mut snapshot: Vec<(String, Value)> = state
            .elements
            .iter()
            .filter(|(key, _)| {
                !matches!(
                    overlay.map(|ov| ov.resolve(key)),
                    Some(OverlayHit::Removed)
                )
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if let Some(overlay) = overlay {
            for (key, value) in overlay.inclusions() {
                if !state.elements.contains_key(key) {
                    snapshot.push((key.clone(), value.clone()));
                }
            }
        }
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(SetIter {
            items: snapshot
                .into_iter()
                .map(|(_, value)| value)
                .collect::<Vec<_>>()
                .into_iter(),
        })
    }

    fn resolve(
        inner: &SetInner,
        state: &SetState,
        tx: Option<&Transaction>,
        key: &str,
    ) -> Option<Value> {
        if let Some(tx) = tx.filter(|_| inner.sharing.is_shared()) {
            if let Some(overlay) = state.overlays.of(tx.id()) {
                match overlay.resolve(key) {
                    OverlayHit::Removed => return None,
                    OverlayHit::Included(pending) => return Some(pending.clone()),
                    OverlayHit::Miss => {}
                }
            }
        }
        state.elements.get(key).cloned()
    }

    /// Register the one-time end-of-transaction callback for (set, tx).
    fn ensure_end_callback(&self, tx: &Transaction) -> Result<()> {
        let inner = &self.inner;
        {
            let mut state = inner.lock_state();
            if !state.end_registered.insert(tx.id()) {
                return Ok(());
            }
        }
        let callback_inner = Arc::clone(inner);
        let tx_id = tx.id();
        let registered = tx.on_end(inner.registrant, move |_, success| {
            end_of_transaction(&callback_inner, tx_id, success);
        });
        if let Err(e) = registered {
            let mut state = inner.lock_state();
            state.end_registered.remove(&tx.id());
            drop(state);
            inner.gate.release(tx.id());
            return Err(e.into());
        }
        Ok(())
    }
}

/// Merge or discard a transaction's overlay, persist, and release the gate.
fn end_of_transaction(inner: &Arc<SetInner>, tx_id: TransactionId, success: bool) {
    let mut to_watch = Vec::new();
    let merged = {
        let mut state = inner.lock_state();
        state.end_registered.remove(&tx_id);
        let overlay = state.overlays.take(tx_id);
        match overlay {
            Some(overlay) if success => {
                let (inclusions, removals) = overlay.into_parts();
                for (key, value) in inclusions {
                    if inner.binding.get().is_some() && value.is_mutable() {
                        to_watch.push((key.clone(), value.clone()));
                    }
                    state.insert_element(&inner.config.uniqueness, key, value);
                }
                for key in removals {
                    state.remove_element(&inner.config.uniqueness, &key);
                }
                true
            }
            _ => false,
        }
    };
    if merged {
        if let Err(e) = inner.persist_now() {
            // End callbacks cannot propagate; surface through the log.
            warn!(error = %e, "failed to persist collection after commit");
        }
        for (key, element) in to_watch {
            persist::attach_set_element_watcher(inner, key, &element);
        }
    }
    inner.gate.release(tx_id);
}

impl SetInner {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SetState> {
        self.state.lock().expect("lock poisoned")
    }

    pub(crate) fn collection_url(&self) -> Option<&ResourceUrl> {
        self.binding.get().map(|b| &b.url)
    }

    pub(crate) fn canonical_key(&self, element: &Value) -> Result<String> {
        self.config
            .uniqueness
            .canonical_key(element, self.collection_url())
    }

    fn mint_url_if_needed(&self, element: &Value) -> Result<()> {
        if let Some(url) = self.collection_url() {
            self.config.uniqueness.mint_url_if_needed(url, element)?;
        }
        Ok(())
    }

    /// URL identity is a contract violation outside a persisted, shared
    /// collection.
    fn assert_url_preconditions(&self) -> Result<()> {
        if matches!(self.config.uniqueness, UniquenessPolicy::ByUrl)
            && (!self.sharing.is_shared() || self.binding.get().is_none())
        {
            return Err(CollectionError::UrlUniquenessRequiresPersistedShared);
        }
        Ok(())
    }

    /// Bind the set to a storage location. Used by the persistence adapter
    /// before elements are loaded, so URL-derived keys resolve.
    pub(crate) fn bind_storage(
        &self,
        storage: Arc<dyn Storage>,
        path: StoragePath,
    ) -> Result<()> {
        let url = storage.base_url().join_path(&path);
        self.binding
            .set(persist::Binding { storage, path, url })
            .map_err(|_| CollectionError::AlreadyPersisted)
    }

    /// Write the whole snapshot through the storage handle, if bound.
    pub(crate) fn persist_now(&self) -> Result<()> {
        let Some(binding) = self.binding.get() else {
            return Ok(());
        };
        let items: Vec<Value> = {
            let state = self.lock_state();
            let mut entries: Vec<(&String, &Value)> = state.elements.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            entries.into_iter().map(|(_, v)| v.clone()).collect()
        };
        persist::save_snapshot(binding, &items)
    }

    /// Insert a deserialized element without triggering persistence. Loader
    /// only; duplicate canonical keys are a corruption signal.
    pub(crate) fn add_unpersisted(&self, element: Value) -> Result<()> {
        if !self.config.element_shape.test(&element) {
            return Err(CollectionError::ShapeViolation);
        }
        self.mint_url_if_needed(&element)?;
        let key = self.canonical_key(&element)?;
        let mut state = self.lock_state();
        if state.elements.contains_key(&key) {
            return Err(CollectionError::UniquenessViolation { key });
        }
        state.insert_element(&self.config.uniqueness, key, element);
        Ok(())
    }

    /// Re-save the snapshot after one of its mutable elements changed.
    ///
    /// Returns `false` (deregister the watcher) once the element is gone;
    /// skips the save while a transaction has uncommitted changes touching
    /// the element's key.
    pub(crate) fn persist_after_element_mutation(&self, key: &str, element: &Value) -> bool {
        {
            let state = self.lock_state();
            match state.elements.get(key) {
                Some(present) if present.same(element) => {}
                _ => return false,
            }
            if state.overlays.any_pending_for(key) {
                return true;
            }
        }
        if let Err(e) = self.persist_now() {
            warn!(error = %e, "failed to persist collection after element mutation");
        }
        true
    }
}

/// Point-in-time snapshot iterator over a set. Finite; not restartable.
pub struct SetIter {
    items: std::vec::IntoIter<Value>,
}

impl Iterator for SetIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.items.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

impl ExactSizeIterator for SetIter {}
