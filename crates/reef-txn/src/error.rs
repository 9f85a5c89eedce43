use thiserror::Error;

/// Errors produced by transaction operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxError {
    #[error("transaction is already finished")]
    Finished,

    #[error("an end callback is already registered for this registrant")]
    CallbackAlreadyRegistered,
}
