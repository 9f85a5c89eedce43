//! The `Map` collection: immutable keys associated with arbitrary values.
//!
//! A map reuses the same lifecycle machinery as [`crate::set::Set`]:
//! exclusive → shared promotion, the per-collection writer gate, and
//! per-transaction overlays. Keys are identified by their canonical
//! serialized form, so they must be immutable; values carry no identity
//! constraint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tracing::warn;

use reef_store::Storage;
use reef_txn::{RegistrantId, Transaction, TransactionId};
use reef_types::{ResourceUrl, StoragePath};
use reef_value::{codec, ElementShape, Value};

use crate::error::{CollectionError, Result};
use crate::gate::{SharingState, TxGate};
use crate::overlay::{OverlayHit, OverlayTable};
use crate::persist;

/// Configuration of a [`MapCollection`]: independent shape constraints for
/// keys and values.
#[derive(Clone)]
pub struct MapConfig {
    pub key_shape: Arc<dyn ElementShape>,
    pub value_shape: Arc<dyn ElementShape>,
}

impl MapConfig {
    pub fn new(key_shape: Arc<dyn ElementShape>, value_shape: Arc<dyn ElementShape>) -> Self {
        Self {
            key_shape,
            value_shape,
        }
    }
}

/// One association. The overlay payload and iteration item of a map.
#[derive(Clone, Debug)]
pub struct MapEntry {
    pub key: Value,
    pub value: Value,
}

/// A transactional map. Clones share the same collection.
#[derive(Clone)]
pub struct MapCollection {
    pub(crate) inner: Arc<MapInner>,
}

pub(crate) struct MapInner {
    registrant: RegistrantId,
    pub(crate) config: MapConfig,
    sharing: SharingState,
    gate: TxGate,
    pub(crate) state: Mutex<MapState>,
    pub(crate) binding: OnceLock<persist::Binding>,
}

#[derive(Default)]
pub(crate) struct MapState {
    pub(crate) entries: HashMap<String, MapEntry>,
    pub(crate) overlays: OverlayTable<MapEntry>,
    end_registered: std::collections::HashSet<TransactionId>,
}

/// Canonical key of a map key value. Mutable keys are rejected, since their
/// representation could drift after insertion.
pub(crate) fn map_key_of(key: &Value) -> Result<String> {
    if key.is_mutable() {
        return Err(CollectionError::MutableMapKey);
    }
    Ok(codec::to_canonical_json(key)?)
}

impl MapCollection {
    /// Create a new, empty, exclusive map.
    pub fn new(config: MapConfig) -> Self {
        Self {
            inner: Arc::new(MapInner {
                registrant: RegistrantId::new(),
                config,
                sharing: SharingState::default(),
                gate: TxGate::default(),
                state: Mutex::new(MapState::default()),
                binding: OnceLock::new(),
            }),
        }
    }

    /// Create an exclusive map from initial associations.
    pub fn with_entries<I>(config: MapConfig, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Value, Value)>,
    {
        let map = Self::new(config);
        for (key, value) in entries {
            map.insert(None, key, value)?;
        }
        Ok(map)
    }

    /// Promote the map to shared mode. Irreversible.
    pub fn share(&self) {
        self.inner.sharing.share();
    }

    pub fn is_shared(&self) -> bool {
        self.inner.sharing.is_shared()
    }

    /// The map's resolved resource URL, if it is persisted.
    pub fn url(&self) -> Option<&ResourceUrl> {
        self.inner.binding.get().map(|b| &b.url)
    }

    /// Associate `key` with `value`.
    ///
    /// Inserting an association equal to the present one is a no-op; a
    /// different value under an already-associated key is a uniqueness
    /// violation. Use [`MapCollection::remove`] first to re-associate.
    pub fn insert(&self, tx: Option<&Transaction>, key: Value, value: Value) -> Result<()> {
        let inner = &self.inner;
        if !inner.config.key_shape.test(&key) || !inner.config.value_shape.test(&value) {
            return Err(CollectionError::ShapeViolation);
        }
        let canonical = map_key_of(&key)?;

        if !inner.sharing.is_shared() {
            let mut state = inner.lock_state();
            Self::insert_entry(&mut state.entries, canonical, key, value)?;
            return Ok(());
        }

        match tx {
            None => {
                inner.gate.wait_until_free();
                let watch = (inner.binding.get().is_some() && value.is_mutable())
                    .then(|| value.clone());
                let inserted = {
                    let mut state = inner.lock_state();
                    Self::insert_entry(&mut state.entries, canonical.clone(), key, value)?
                };
                // A no-op re-insert leaves the snapshot and watchers alone.
                if inserted {
                    inner.persist_now()?;
                    if let Some(watched) = watch {
                        persist::attach_map_value_watcher(inner, canonical, &watched);
                    }
                }
                Ok(())
            }
            Some(tx) => {
                inner.gate.acquire(tx.id());
                self.ensure_end_callback(tx)?;
                let mut state = inner.lock_state();
                if let Some(present) = state.entries.get(&canonical) {
                    if !Self::associations_equal(&present.value, &value) {
                        return Err(CollectionError::UniquenessViolation { key: canonical });
                    }
                }
                if let Some(pending) = state.overlays.of_mut(tx.id()).pending_inclusion(&canonical)
                {
                    if !Self::associations_equal(&pending.value, &value) {
                        return Err(CollectionError::UniquenessViolation { key: canonical });
                    }
                }
                state
                    .overlays
                    .of_mut(tx.id())
                    .include(canonical, MapEntry { key, value });
                Ok(())
            }
        }
    }

    /// Remove the association for `key`, if any.
    pub fn remove(&self, tx: Option<&Transaction>, key: &Value) -> Result<()> {
        let inner = &self.inner;
        if !inner.config.key_shape.test(key) {
            return Err(CollectionError::ShapeViolation);
        }
        let canonical = map_key_of(key)?;

        if !inner.sharing.is_shared() {
            inner.lock_state().entries.remove(&canonical);
            return Ok(());
        }

        match tx {
            None => {
                inner.gate.wait_until_free();
                let removed = inner.lock_state().entries.remove(&canonical).is_some();
                if removed {
                    inner.persist_now()?;
                }
                Ok(())
            }
            Some(tx) => {
                inner.gate.acquire(tx.id());
                self.ensure_end_callback(tx)?;
                let mut state = inner.lock_state();
                state.overlays.of_mut(tx.id()).remove(canonical);
                Ok(())
            }
        }
    }

    /// The value associated with `key`, from the caller's point of view.
    pub fn get(&self, tx: Option<&Transaction>, key: &Value) -> Result<Option<Value>> {
        let inner = &self.inner;
        let canonical = map_key_of(key)?;
        let state = inner.lock_state();
        if let Some(tx) = tx.filter(|_| inner.sharing.is_shared()) {
            if let Some(overlay) = state.overlays.of(tx.id()) {
                match overlay.resolve(&canonical) {
                    OverlayHit::Removed => return Ok(None),
                    OverlayHit::Included(pending) => return Ok(Some(pending.value.clone())),
                    OverlayHit::Miss => {}
                }
            }
        }
        Ok(state.entries.get(&canonical).map(|e| e.value.clone()))
    }

    /// Returns `true` if `key` is associated, from the caller's point of
    /// view.
    pub fn contains_key(&self, tx: Option<&Transaction>, key: &Value) -> Result<bool> {
        Ok(self.get(tx, key)?.is_some())
    }

    /// Number of associations visible to the caller.
    pub fn len(&self, tx: Option<&Transaction>) -> Result<usize> {
        let inner = &self.inner;
        let state = inner.lock_state();
        let overlay = tx
            .filter(|_| inner.sharing.is_shared())
            .and_then(|tx| state.overlays.of(tx.id()));
        let mut count = 0usize;
        for canonical in state.entries.keys() {
            if !matches!(
                overlay.map(|ov| ov.resolve(canonical)),
                Some(OverlayHit::Removed)
            ) {
                count += 1;
            }
        }
        if let Some(overlay) = overlay {
            count += overlay
                .inclusions()
                .filter(|(canonical, _)| !state.entries.contains_key(*canonical))
                .count();
        }
        Ok(count)
    }

    pub fn is_empty(&self, tx: Option<&Transaction>) -> Result<bool> {
        Ok(self.len(tx)? == 0)
    }

    /// A point-in-time snapshot of the associations visible to the caller,
    /// ordered by canonical key.
    pub fn iter(&self, tx: Option<&Transaction>) -> Result<std::vec::IntoIter<MapEntry>> {
        let inner = &self.inner;
        let state = inner.lock_state();
        let overlay = tx
            .filter(|_| inner.sharing.is_shared())
            .and_then(|tx| state.overlays.of(tx.id()));

        let mut snapshot: Vec<(String, MapEntry)> = state
            .entries
            .iter()
            .filter(|(canonical, _)| {
                !matches!(
                    overlay.map(|ov| ov.resolve(canonical)),
                    Some(OverlayHit::Removed)
                )
            })
            .map(|(canonical, entry)| (canonical.clone(), entry.clone()))
            .collect();
        if let Some(overlay) = overlay {
            for (canonical, entry) in overlay.inclusions() {
                if !state.entries.contains_key(canonical) {
                    snapshot.push((canonical.clone(), entry.clone()));
                }
            }
        }
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(snapshot
            .into_iter()
            .map(|(_, entry)| entry)
            .collect::<Vec<_>>()
            .into_iter())
    }

    /// Returns `true` if the association was inserted, `false` for a no-op
    /// re-insert of an equal association.
    fn insert_entry(
        entries: &mut HashMap<String, MapEntry>,
        canonical: String,
        key: Value,
        value: Value,
    ) -> Result<bool> {
        if let Some(present) = entries.get(&canonical) {
            if !Self::associations_equal(&present.value, &value) {
                return Err(CollectionError::UniquenessViolation { key: canonical });
            }
            return Ok(false);
        }
        entries.insert(canonical, MapEntry { key, value });
        Ok(true)
    }

    /// Re-inserting the same association is a no-op: identical by handle for
    /// mutable values, structurally equal otherwise.
    fn associations_equal(present: &Value, candidate: &Value) -> bool {
        if present.is_mutable() || candidate.is_mutable() {
            present.same(candidate)
        } else {
            present == candidate
        }
    }

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

fn end_of_transaction(inner: &Arc<MapInner>, tx_id: TransactionId, success: bool) {
    let mut to_watch = Vec::new();
    let merged = {
        let mut state = inner.lock_state();
        state.end_registered.remove(&tx_id);
        let overlay = state.overlays.take(tx_id);
        match overlay {
            Some(overlay) if success => {
                let (inclusions, removals) = overlay.into_parts();
                for (canonical, entry) in inclusions {
                    if inner.binding.get().is_some() && entry.value.is_mutable() {
                        to_watch.push((canonical.clone(), entry.value.clone()));
                    }
                    state.entries.insert(canonical, entry);
                }
                for canonical in removals {
                    state.entries.remove(&canonical);
                }
                true
            }
            _ => false,
        }
    };
    if merged {
        if let Err(e) = inner.persist_now() {
            warn!(error = %e, "failed to persist map after commit");
        }
        for (canonical, value) in to_watch {
            persist::attach_map_value_watcher(inner, canonical, &value);
        }
    }
    inner.gate.release(tx_id);
}

impl MapInner {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, MapState> {
        self.state.lock().expect("lock poisoned")
    }

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

    /// Insert a deserialized association without triggering persistence.
    /// Loader only.
    pub(crate) fn insert_unpersisted(&self, key: Value, value: Value) -> Result<()> {
        if !self.config.key_shape.test(&key) || !self.config.value_shape.test(&value) {
            return Err(CollectionError::ShapeViolation);
        }
        let canonical = map_key_of(&key)?;
        let mut state = self.lock_state();
        if state.entries.contains_key(&canonical) {
            return Err(CollectionError::UniquenessViolation { key: canonical });
        }
        state.entries.insert(canonical, MapEntry { key, value });
        Ok(())
    }

    pub(crate) fn persist_now(&self) -> Result<()> {
        let Some(binding) = self.binding.get() else {
            return Ok(());
        };
        let entries: Vec<MapEntry> = {
            let state = self.lock_state();
            let mut items: Vec<(&String, &MapEntry)> = state.entries.iter().collect();
            items.sort_by(|a, b| a.0.cmp(b.0));
            items.into_iter().map(|(_, e)| e.clone()).collect()
        };
        persist::save_map_snapshot(binding, &entries)
    }

    /// Re-save the snapshot after a mutable associated value changed.
    /// Returns `false` (deregister the watcher) once the association is gone.
    pub(crate) fn persist_after_value_mutation(&self, canonical: &str, value: &Value) -> bool {
        {
            let state = self.lock_state();
            match state.entries.get(canonical) {
                Some(present) if present.value.same(value) => {}
                _ => return false,
            }
            if state.overlays.any_pending_for(canonical) {
                return true;
            }
        }
        if let Err(e) = self.persist_now() {
            warn!(error = %e, "failed to persist map after value mutation");
        }
        true
    }
}
