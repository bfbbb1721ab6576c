//! Error types for encoding and decoding wire messages.

use thiserror::Error;

pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("missing query parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid value for query parameter '{name}': {value}")]
    InvalidParameter { name: &'static str, value: String },

    #[error("resource index {index} out of range for module '{module}' ({len} resources)")]
    ResourceIndexOutOfRange {
        module: String,
        index: usize,
        len: usize,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
