use thiserror::Error;

/// Errors produced by value operations and the canonical codec.
#[derive(Debug, Error)]
pub enum ValueError {
    #[error("value already has a bound resource URL")]
    UrlAlreadyBound,

    #[error("property name is reserved: {0}")]
    ReservedProperty(String),

    #[error("value does not match the expected shape")]
    ShapeMismatch,

    #[error("JSON error: {0}")]
    Json(String),

    #[error("invalid serialized value: {0}")]
    InvalidSerialized(String),
}

impl From<serde_json::Error> for ValueError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}
