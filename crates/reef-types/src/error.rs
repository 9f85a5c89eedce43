use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    #[error("invalid resource URL: {0}")]
    InvalidUrl(String),

    #[error("invalid path key: {0}")]
    InvalidPathKey(String),
}
