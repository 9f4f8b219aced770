//! Error types for skein-protocol

use thiserror::Error;

/// Result type alias using skein-protocol Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding agent payloads
#[derive(Error, Debug)]
pub enum Error {
    /// Payload was not valid JSON, or did not match the expected shape
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload carried a message type we do not understand
    #[error("Unknown message kind: {0}")]
    UnknownKind(String),

    /// A required field was absent
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Channel name did not follow the naming convention
    #[error("Invalid channel name: {0}")]
    InvalidChannel(String),
}
