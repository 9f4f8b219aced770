//! Error types for skein-session

use thiserror::Error;

/// Result type alias using skein-session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating sessions
#[derive(Error, Debug)]
pub enum Error {
    /// An agent payload could not be decoded
    #[error(transparent)]
    Protocol(#[from] skein_protocol::Error),

    /// The agent gateway rejected a request
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A coordinator operation is not legal in its current state
    #[error(transparent)]
    State(#[from] crate::state::InvalidTransition),

    /// The translation collaborator failed
    #[error("Translation error: {0}")]
    Translation(String),

    /// The checkpoint collaborator failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// No tab with this id
    #[error("Tab not found: {0}")]
    TabNotFound(String),

    /// An operation needed an active tab but none exists
    #[error("No active tab")]
    NoActiveTab,

    /// A positional index was out of range
    #[error("Index {index} out of range for {len} tabs")]
    InvalidIndex { index: usize, len: usize },

    /// The prompt queue is at capacity; the new prompt was not queued
    #[error("Prompt queue is full ({0} prompts)")]
    QueueFull(usize),

    /// The tab store failed to load or save
    #[error("Tab store error: {0}")]
    Store(String),

    /// A generic error
    #[error("{0}")]
    Other(String),
}

/// Errors reported by an agent gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The agent does not recognise the session id
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// The agent process could not be launched
    #[error("Failed to launch agent: {0}")]
    Spawn(String),

    /// There is no running process to act on
    #[error("No running agent process")]
    NotRunning,

    /// I/O failure talking to the agent
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other gateway failure
    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// Whether this error means a resume was refused for the given id, as
    /// opposed to the agent being unreachable altogether
    pub fn is_resume_rejection(&self) -> bool {
        matches!(self, GatewayError::UnknownSession(_))
    }
}
