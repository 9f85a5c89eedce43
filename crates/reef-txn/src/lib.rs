//! Transactions for Reef.
//!
//! A [`Transaction`] is the unit of isolation for shared collections. It does
//! not itself hold any collection data: collections keep per-transaction
//! pending overlays and register a keyed [end callback](Transaction::on_end)
//! that the transaction runs exactly once, with a success flag, when it
//! commits or rolls back. On success the collection merges its overlay; on
//! failure it discards it.

pub mod error;
pub mod transaction;

pub use error::TxError;
pub use transaction::{RegistrantId, Transaction, TransactionId, TxStatus};
