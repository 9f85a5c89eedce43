//! The `Thread` collection: an append-only sequence of object messages.
//!
//! Each appended message is assigned a time-ordered identifier at insertion;
//! iterating in identifier order is iteration in append order. Threads never
//! remove messages, so their overlays carry pending inclusions only.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tracing::warn;
use uuid::Uuid;

use reef_store::Storage;
use reef_txn::{RegistrantId, Transaction, TransactionId};
use reef_types::{ResourceUrl, StoragePath};
use reef_value::{ElementShape, ObjectValue, Value};

use crate::error::{CollectionError, Result};
use crate::gate::{SharingState, TxGate};
use crate::persist;

/// Configuration of a [`Thread`]: the shape every message must match.
/// Messages are always objects.
#[derive(Clone)]
pub struct ThreadConfig {
    pub element_shape: Arc<dyn ElementShape>,
}

impl ThreadConfig {
    pub fn new(element_shape: Arc<dyn ElementShape>) -> Self {
        Self { element_shape }
    }
}

/// A transactional append-only thread. Clones share the same collection.
#[derive(Clone)]
pub struct Thread {
    pub(crate) inner: Arc<ThreadInner>,
}

pub(crate) struct ThreadInner {
    registrant: RegistrantId,
    pub(crate) config: ThreadConfig,
    sharing: SharingState,
    gate: TxGate,
    pub(crate) state: Mutex<ThreadState>,
    pub(crate) binding: OnceLock<persist::Binding>,
}

/// Messages keyed by their time-ordered identifier; `BTreeMap` order is
/// append order.
#[derive(Default)]
pub(crate) struct ThreadState {
    pub(crate) messages: BTreeMap<String, ObjectValue>,
    pending: BTreeMap<TransactionId, BTreeMap<String, ObjectValue>>,
    end_registered: std::collections::HashSet<TransactionId>,
}

impl ThreadState {
    pub(crate) fn has_pending(&self) -> bool {
        self.pending.values().any(|p| !p.is_empty())
    }
}

impl Thread {
    /// Create a new, empty, exclusive thread.
    pub fn new(config: ThreadConfig) -> Self {
        Self {
            inner: Arc::new(ThreadInner {
                registrant: RegistrantId::new(),
                config,
                sharing: SharingState::default(),
                gate: TxGate::default(),
                state: Mutex::new(ThreadState::default()),
                binding: OnceLock::new(),
            }),
        }
    }

    /// Promote the thread to shared mode. Irreversible.
    pub fn share(&self) {
        self.inner.sharing.share();
    }

    pub fn is_shared(&self) -> bool {
        self.inner.sharing.is_shared()
    }

    /// The thread's resolved resource URL, if it is persisted.
    pub fn url(&self) -> Option<&ResourceUrl> {
        self.inner.binding.get().map(|b| &b.url)
    }

    /// Append a message. The message is assigned a time-ordered identifier
    /// and, on a persisted thread, a resource URL derived from it.
    pub fn add(&self, tx: Option<&Transaction>, message: ObjectValue) -> Result<()> {
        let inner = &self.inner;
        if !inner.config.element_shape.test(&Value::Object(message.clone())) {
            return Err(CollectionError::ShapeViolation);
        }

        if !inner.sharing.is_shared() {
            let id = inner.mint_message_id(&message)?;
            inner.lock_state().messages.insert(id, message);
            return Ok(());
        }

        match tx {
            None => {
                inner.gate.wait_until_free();
                let id = inner.mint_message_id(&message)?;
                inner.lock_state().messages.insert(id.clone(), message.clone());
                inner.persist_now()?;
                if inner.binding.get().is_some() {
                    persist::attach_thread_message_watcher(inner, id, message);
                }
                Ok(())
            }
            Some(tx) => {
                inner.gate.acquire(tx.id());
                self.ensure_end_callback(tx)?;
                let id = inner.mint_message_id(&message)?;
                let mut state = inner.lock_state();
                state.pending.entry(tx.id()).or_default().insert(id, message);
                Ok(())
            }
        }
    }

    /// Number of messages visible to the caller.
    pub fn len(&self, tx: Option<&Transaction>) -> Result<usize> {
        let inner = &self.inner;
        let state = inner.lock_state();
        let pending = tx
            .filter(|_| inner.sharing.is_shared())
            .and_then(|tx| state.pending.get(&tx.id()))
            .map_or(0, BTreeMap::len);
        Ok(state.messages.len() + pending)
    }

    pub fn is_empty(&self, tx: Option<&Transaction>) -> Result<bool> {
        Ok(self.len(tx)? == 0)
    }

    /// The most recently appended message visible to the caller.
    pub fn newest(&self, tx: Option<&Transaction>) -> Result<Option<ObjectValue>> {
        let inner = &self.inner;
        let state = inner.lock_state();
        if let Some(tx) = tx.filter(|_| inner.sharing.is_shared()) {
            if let Some(pending) = state.pending.get(&tx.id()) {
                if let Some((_, message)) = pending.iter().next_back() {
                    return Ok(Some(message.clone()));
                }
            }
        }
        Ok(state.messages.iter().next_back().map(|(_, m)| m.clone()))
    }

    /// A point-in-time snapshot of the messages visible to the caller, in
    /// append order.
    pub fn iter(&self, tx: Option<&Transaction>) -> Result<std::vec::IntoIter<ObjectValue>> {
        let inner = &self.inner;
        let state = inner.lock_state();
        let mut snapshot: BTreeMap<String, ObjectValue> = state.messages.clone();
        if let Some(tx) = tx.filter(|_| inner.sharing.is_shared()) {
            if let Some(pending) = state.pending.get(&tx.id()) {
                for (id, message) in pending {
                    snapshot.insert(id.clone(), message.clone());
                }
            }
        }
        Ok(snapshot
            .into_values()
            .collect::<Vec<_>>()
            .into_iter())
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

fn end_of_transaction(inner: &Arc<ThreadInner>, tx_id: TransactionId, success: bool) {
    let mut to_watch = Vec::new();
    let merged = {
        let mut state = inner.lock_state();
        state.end_registered.remove(&tx_id);
        match state.pending.remove(&tx_id) {
            Some(pending) if success => {
                if inner.binding.get().is_some() {
                    to_watch.extend(pending.iter().map(|(id, m)| (id.clone(), m.clone())));
                }
                state.messages.extend(pending);
                true
            }
            _ => false,
        }
    };
    if merged {
        if let Err(e) = inner.persist_now() {
            warn!(error = %e, "failed to persist thread after commit");
        }
        for (id, message) in to_watch {
            persist::attach_thread_message_watcher(inner, id, message);
        }
    }
    inner.gate.release(tx_id);
}

impl ThreadInner {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ThreadState> {
        self.state.lock().expect("lock poisoned")
    }

    /// Mint the message's time-ordered identifier and, on a persisted
    /// thread, bind the matching resource URL.
    fn mint_message_id(&self, message: &ObjectValue) -> Result<String> {
        if let Some(binding) = self.binding.get() {
            if let Some(existing) = message.url() {
                return match binding.url.child_suffix(existing) {
                    Some(suffix) => Ok(suffix.to_owned()),
                    None => Err(CollectionError::ElementUrlOutsideCollection {
                        url: existing.clone(),
                    }),
                };
            }
            let id = Uuid::now_v7().simple().to_string();
            let url = binding
                .url
                .join(&id)
                .map_err(|e| reef_value::ValueError::InvalidSerialized(e.to_string()))?;
            message.bind_url(url)?;
            return Ok(id);
        }
        Ok(Uuid::now_v7().simple().to_string())
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

    /// Insert a loaded message under its recovered identifier. Loader only.
    pub(crate) fn add_unpersisted(&self, id: String, message: ObjectValue) -> Result<()> {
        if !self.config.element_shape.test(&Value::Object(message.clone())) {
            return Err(CollectionError::ShapeViolation);
        }
        self.lock_state().messages.insert(id, message);
        Ok(())
    }

    pub(crate) fn persist_now(&self) -> Result<()> {
        let Some(binding) = self.binding.get() else {
            return Ok(());
        };
        let messages: Vec<ObjectValue> = {
            let state = self.lock_state();
            state.messages.values().cloned().collect()
        };
        persist::save_thread_snapshot(binding, &messages)
    }

    /// Re-save the snapshot after a message mutated. Returns `false`
    /// (deregister the watcher) once the message is gone.
    pub(crate) fn persist_after_message_mutation(&self, id: &str, message: &ObjectValue) -> bool {
        {
            let state = self.lock_state();
            match state.messages.get(id) {
                Some(present) if present.same(message) => {}
                _ => return false,
            }
        }
        if let Err(e) = self.persist_now() {
            warn!(error = %e, "failed to persist thread after message mutation");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reef_value::ShapePattern;

    fn message(text: &str) -> ObjectValue {
        ObjectValue::from_entries([("text", Value::Str(text.into()))]).unwrap()
    }

    fn any_thread() -> Thread {
        Thread::new(ThreadConfig::new(Arc::new(ShapePattern::object([(
            "text",
            ShapePattern::Str,
        )]))))
    }

    #[test]
    fn appends_preserve_order() {
        let thread = any_thread();
        thread.add(None, message("first")).unwrap();
        thread.add(None, message("second")).unwrap();
        thread.add(None, message("third")).unwrap();

        let texts: Vec<Value> = thread
            .iter(None)
            .unwrap()
            .map(|m| m.get("text").unwrap())
            .collect();
        assert_eq!(
            texts,
            vec![
                Value::Str("first".into()),
                Value::Str("second".into()),
                Value::Str("third".into()),
            ]
        );
        assert_eq!(
            thread.newest(None).unwrap().unwrap().get("text"),
            Some(Value::Str("third".into()))
        );
    }

    #[test]
    fn shape_is_enforced() {
        let thread = any_thread();
        let bad = ObjectValue::from_entries([("text", Value::Int(1))]).unwrap();
        assert!(matches!(
            thread.add(None, bad),
            Err(CollectionError::ShapeViolation)
        ));
    }

    #[test]
    fn pending_messages_are_isolated_until_commit() {
        let thread = any_thread();
        thread.share();
        thread.add(None, message("committed")).unwrap();

        let tx = Transaction::new();
        thread.add(Some(&tx), message("pending")).unwrap();

        assert_eq!(thread.len(None).unwrap(), 1);
        assert_eq!(thread.len(Some(&tx)).unwrap(), 2);
        assert_eq!(
            thread.newest(Some(&tx)).unwrap().unwrap().get("text"),
            Some(Value::Str("pending".into()))
        );

        tx.commit().unwrap();
        assert_eq!(thread.len(None).unwrap(), 2);
    }

    #[test]
    fn rollback_discards_pending_messages() {
        let thread = any_thread();
        thread.share();
        let tx = Transaction::new();
        thread.add(Some(&tx), message("doomed")).unwrap();
        tx.rollback().unwrap();
        assert!(thread.is_empty(None).unwrap());
    }
}
