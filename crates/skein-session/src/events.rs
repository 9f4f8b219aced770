//! Events a coordinator emits to its observers

use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointDecision;

/// Coarse streaming status shown on a tab
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingStatus {
    #[default]
    Idle,
    Streaming,
    Complete,
    Error,
}

/// Events emitted by a [`SessionCoordinator`](crate::SessionCoordinator)
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A message was appended to the log at `index`
    MessageAppended { index: usize },

    /// Busy/queue state changed
    StatusChanged {
        status: StreamingStatus,
        has_unsaved_changes: bool,
    },

    /// The session id was discovered (or rediscovered) from the stream
    SessionIdentified { session_id: String },

    /// A prompt was queued behind the in-flight request
    Queued { position: usize },

    /// An error the user should see
    Error { message: String },

    /// The checkpoint hook returned a decision
    Checkpoint { decision: CheckpointDecision },
}
