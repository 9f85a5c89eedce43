//! Sharing state and the per-collection writer gate.
//!
//! A collection starts exclusive and transitions one way to shared. Once
//! shared, write-write exclusion across transactions is enforced by the
//! [`TxGate`]: a transaction's first mutating call claims the gate, and every
//! other transaction's mutating call blocks until the owner's
//! end-of-transaction callback releases it. This yields de-facto
//! serializability per collection, not per key. Gate waits are not
//! cancellable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use reef_txn::TransactionId;

/// One-way Exclusive → Shared ownership state.
#[derive(Debug, Default)]
pub(crate) struct SharingState {
    shared: AtomicBool,
}

impl SharingState {
    pub(crate) fn is_shared(&self) -> bool {
        self.shared.load(Ordering::Acquire)
    }

    /// Promote to shared. Irreversible.
    pub(crate) fn share(&self) {
        self.shared.store(true, Ordering::Release);
    }
}

/// Writer gate: at most one transaction holds uncommitted changes to a
/// collection at a time.
#[derive(Debug, Default)]
pub(crate) struct TxGate {
    owner: Mutex<Option<TransactionId>>,
    freed: Condvar,
}

impl TxGate {
    /// Claim the gate for `tx`, blocking while another transaction owns it.
    /// Re-entrant for the owning transaction.
    pub(crate) fn acquire(&self, tx: TransactionId) {
        let mut owner = self.owner.lock().expect("lock poisoned");
        while matches!(*owner, Some(current) if current != tx) {
            owner = self.freed.wait(owner).expect("lock poisoned");
        }
        *owner = Some(tx);
    }

    /// Block until no transaction owns the gate, without claiming it. Used
    /// by non-transactional mutations, which become visible immediately.
    pub(crate) fn wait_until_free(&self) {
        let mut owner = self.owner.lock().expect("lock poisoned");
        while owner.is_some() {
            owner = self.freed.wait(owner).expect("lock poisoned");
        }
    }

    /// Release the gate if `tx` owns it and wake all waiters.
    pub(crate) fn release(&self, tx: TransactionId) {
        let mut owner = self.owner.lock().expect("lock poisoned");
        if *owner == Some(tx) {
            *owner = None;
            self.freed.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reef_txn::Transaction;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn sharing_is_one_way() {
        let sharing = SharingState::default();
        assert!(!sharing.is_shared());
        sharing.share();
        assert!(sharing.is_shared());
    }

    #[test]
    fn gate_is_reentrant_for_the_owner() {
        let gate = TxGate::default();
        let tx = Transaction::new();
        gate.acquire(tx.id());
        gate.acquire(tx.id());
        gate.release(tx.id());
    }

    #[test]
    fn second_transaction_blocks_until_release() {
        let gate = Arc::new(TxGate::default());
        let t1 = Transaction::new();
        let t2 = Transaction::new();
        gate.acquire(t1.id());

        let gate2 = gate.clone();
        let t2_id = t2.id();
        let waiter = std::thread::spawn(move || {
            gate2.acquire(t2_id);
            gate2.release(t2_id);
        });

        // Give the waiter time to block, then release.
        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        gate.release(t1.id());
        waiter.join().unwrap();
    }

    #[test]
    fn release_by_non_owner_is_a_no_op() {
        let gate = TxGate::default();
        let t1 = Transaction::new();
        let t2 = Transaction::new();
        gate.acquire(t1.id());
        gate.release(t2.id());
        // t1 still owns the gate.
        let owner = gate.owner.lock().unwrap();
        assert_eq!(*owner, Some(t1.id()));
    }
}
