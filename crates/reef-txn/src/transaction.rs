use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::error::TxError;

/// Unique, time-ordered transaction identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(Uuid);

impl TransactionId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

/// Identity of a party that registered an end callback (one per collection
/// instance).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrantId(Uuid);

impl RegistrantId {
    /// Mint a fresh registrant identity.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RegistrantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RegistrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegistrantId({})", self.0)
    }
}

/// Lifecycle state of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Committed,
    RolledBack,
}

type EndCallback = Box<dyn FnOnce(&Transaction, bool) + Send>;

/// A transaction handle. Clones share the same transaction.
///
/// Collections register one end callback per instance via
/// [`Transaction::on_end`]; [`commit`](Transaction::commit) runs them with
/// `success = true`, [`rollback`](Transaction::rollback) with
/// `success = false`. Callbacks run outside the transaction's internal lock,
/// so they may freely lock the registering collection.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxInner>,
}

struct TxInner {
    id: TransactionId,
    state: Mutex<TxState>,
}

struct TxState {
    status: TxStatus,
    callbacks: HashMap<RegistrantId, EndCallback>,
}

impl Transaction {
    /// Start a new pending transaction.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TxInner {
                id: TransactionId::new(),
                state: Mutex::new(TxState {
                    status: TxStatus::Pending,
                    callbacks: HashMap::new(),
                }),
            }),
        }
    }

    /// The transaction's identifier.
    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    /// Current lifecycle state.
    pub fn status(&self) -> TxStatus {
        self.inner.state.lock().expect("lock poisoned").status
    }

    /// Returns `true` once the transaction has committed or rolled back.
    pub fn is_finished(&self) -> bool {
        self.status() != TxStatus::Pending
    }

    /// Register an end callback for the given registrant.
    ///
    /// At most one callback may be registered per registrant; a second
    /// registration is an error (registrants are expected to track their own
    /// registrations).
    pub fn on_end<F>(&self, registrant: RegistrantId, callback: F) -> Result<(), TxError>
    where
        F: FnOnce(&Transaction, bool) + Send + 'static,
    {
        let mut state = self.inner.state.lock().expect("lock poisoned");
        if state.status != TxStatus::Pending {
            return Err(TxError::Finished);
        }
        if state.callbacks.contains_key(&registrant) {
            return Err(TxError::CallbackAlreadyRegistered);
        }
        state.callbacks.insert(registrant, Box::new(callback));
        Ok(())
    }

    /// Commit: run every end callback with `success = true`.
    pub fn commit(&self) -> Result<(), TxError> {
        self.finish(TxStatus::Committed, true)
    }

    /// Roll back: run every end callback with `success = false`.
    pub fn rollback(&self) -> Result<(), TxError> {
        self.finish(TxStatus::RolledBack, false)
    }

    fn finish(&self, status: TxStatus, success: bool) -> Result<(), TxError> {
        let callbacks = {
            let mut state = self.inner.state.lock().expect("lock poisoned");
            if state.status != TxStatus::Pending {
                return Err(TxError::Finished);
            }
            state.status = status;
            std::mem::take(&mut state.callbacks)
        };
        for (_, callback) in callbacks {
            callback(self, success);
        }
        Ok(())
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}
