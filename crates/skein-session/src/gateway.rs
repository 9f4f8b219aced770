//! Agent process gateway abstraction
//!
//! A gateway issues requests to the external agent. Requests return once the
//! agent has been asked to act; the agent's output then arrives on the
//! [`EventBus`](crate::bus::EventBus), not through the return value.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Parameters shared by start/continue/resume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    /// Working directory for the agent process
    pub project_path: PathBuf,
    /// Prompt text as it should reach the agent (already translated)
    pub prompt: String,
    /// Model selector passed through to the agent
    pub model: String,
}

/// A session whose agent process is still alive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningSession {
    pub session_id: String,
    pub project_path: PathBuf,
    /// Unix millis
    pub started_at: i64,
}

/// Request-style operations on the external agent
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Begin a brand-new conversation
    async fn start(&self, request: &SendRequest) -> Result<(), GatewayError>;

    /// Continue the most recent conversation in the project
    async fn continue_latest(&self, request: &SendRequest) -> Result<(), GatewayError>;

    /// Resume a specific prior session
    async fn resume(&self, session_id: &str, request: &SendRequest) -> Result<(), GatewayError>;

    /// Best-effort halt of the running process
    async fn cancel(&self, session_id: Option<&str>) -> Result<(), GatewayError>;

    /// Sessions whose process is currently alive
    async fn list_running(&self) -> Result<Vec<RunningSession>, GatewayError>;

    /// The persisted message log of a session, as raw payloads
    async fn load_history(
        &self,
        session_id: &str,
        project_id: &str,
    ) -> Result<Vec<serde_json::Value>, GatewayError>;

    /// The project id under which the agent files a project's history
    fn project_id(&self, project_path: &Path) -> String {
        project_path.display().to_string()
    }
}
