//! Session identity

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One logical conversation with the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Opaque id, either persisted or discovered from the stream
    pub id: String,
    /// Working directory of the agent process
    pub project_path: PathBuf,
}

impl Session {
    pub fn new(id: impl Into<String>, project_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            project_path: project_path.into(),
        }
    }

    /// The last eight characters of the id, for display
    pub fn short_id(&self) -> String {
        let chars: Vec<char> = self.id.chars().collect();
        chars[chars.len().saturating_sub(8)..].iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        assert_eq!(Session::new("0123456789abcdef", "/tmp").short_id(), "89abcdef");
        assert_eq!(Session::new("abc", "/tmp").short_id(), "abc");
    }
}
