//! Tabs: one coordinator each, at most one active

mod registry;
mod store;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::session::Session;

pub use registry::{CleanupFn, CloseOutcome, RegistryConfig, TabRegistry, TabSpec, TabView};
pub use store::{MemoryTabStore, TabStore};

/// Locally generated tab identifier, stable for the tab's lifetime
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The persisted part of a tab
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabRecord {
    pub id: TabId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<PathBuf>,
    /// The session bound to this tab, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_summary: Option<Session>,
    /// Unix millis
    pub created_at: i64,
    /// Unix millis; picks the replacement when the active tab closes
    pub last_activity_at: i64,
}
