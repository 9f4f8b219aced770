//! Event channel naming
//!
//! An agent process publishes on three channels. Each exists in a generic
//! form shared by every session (`agent-output`) and a session-scoped form
//! suffixed with the session identifier (`agent-output:<sessionId>`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Separator between the base channel name and the session id
const SCOPE_SEPARATOR: char = ':';

/// The three event streams an agent process publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// One line of agent output (a JSON message)
    Output,
    /// Diagnostic text from the agent process
    Error,
    /// The agent process finished; payload is a success flag
    Complete,
}

impl ChannelKind {
    /// All kinds, in the order a listener set subscribes to them
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Output, ChannelKind::Error, ChannelKind::Complete];

    /// The generic (unscoped) channel name for this kind
    pub fn base_name(&self) -> &'static str {
        match self {
            ChannelKind::Output => "agent-output",
            ChannelKind::Error => "agent-error",
            ChannelKind::Complete => "agent-complete",
        }
    }

    fn from_base_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.base_name() == name)
    }
}

/// A concrete, case-sensitive channel name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelName(String);

impl ChannelName {
    /// The channel shared by all sessions
    pub fn generic(kind: ChannelKind) -> Self {
        Self(kind.base_name().to_string())
    }

    /// The channel addressed to one session
    pub fn scoped(kind: ChannelKind, session_id: &str) -> Self {
        Self(format!("{}{}{}", kind.base_name(), SCOPE_SEPARATOR, session_id))
    }

    /// Generic output/error/complete names
    pub fn generic_triple() -> [ChannelName; 3] {
        ChannelKind::ALL.map(Self::generic)
    }

    /// Scoped output/error/complete names for `session_id`
    pub fn scoped_triple(session_id: &str) -> [ChannelName; 3] {
        ChannelKind::ALL.map(|k| Self::scoped(k, session_id))
    }

    /// Recover the kind and optional session id from a channel name
    pub fn parse(name: &str) -> Result<(ChannelKind, Option<String>)> {
        let (base, session) = match name.split_once(SCOPE_SEPARATOR) {
            Some((base, id)) if !id.is_empty() => (base, Some(id.to_string())),
            Some(_) => return Err(Error::InvalidChannel(name.to_string())),
            None => (name, None),
        };
        let kind = ChannelKind::from_base_name(base)
            .ok_or_else(|| Error::InvalidChannel(name.to_string()))?;
        Ok((kind, session))
    }

    /// The kind of this channel
    pub fn kind(&self) -> ChannelKind {
        // Names are only built through the constructors above, so the
        // base part is always one of the known kinds.
        let base = self
            .0
            .split_once(SCOPE_SEPARATOR)
            .map(|(b, _)| b)
            .unwrap_or(&self.0);
        ChannelKind::from_base_name(base).unwrap_or(ChannelKind::Output)
    }

    /// The session id this channel is scoped to, if any
    pub fn session_id(&self) -> Option<&str> {
        self.0.split_once(SCOPE_SEPARATOR).map(|(_, id)| id)
    }

    /// Whether this is a generic (unscoped) channel
    pub fn is_generic(&self) -> bool {
        self.session_id().is_none()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_names() {
        let names: Vec<String> = ChannelName::generic_triple()
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(names, vec!["agent-output", "agent-error", "agent-complete"]);
    }

    #[test]
    fn test_scoped_names() {
        let name = ChannelName::scoped(ChannelKind::Complete, "abc123");
        assert_eq!(name.as_str(), "agent-complete:abc123");
        assert_eq!(name.session_id(), Some("abc123"));
        assert_eq!(name.kind(), ChannelKind::Complete);
        assert!(!name.is_generic());
    }

    #[test]
    fn test_parse_round_trips_scoped_ids_with_colons() {
        let (kind, session) = ChannelName::parse("agent-output:abc:def").unwrap();
        assert_eq!(kind, ChannelKind::Output);
        assert_eq!(session.as_deref(), Some("abc:def"));
    }

    #[test]
    fn test_parse_rejects_unknown_and_empty_scope() {
        assert!(ChannelName::parse("claude-output").is_err());
        assert!(ChannelName::parse("agent-output:").is_err());
        // Case-sensitive
        assert!(ChannelName::parse("Agent-Output").is_err());
    }
}
