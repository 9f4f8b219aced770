//! Coordinator lifecycle state machine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a coordinator is in its request/response cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    /// Nothing in flight
    #[default]
    Idle,
    /// Request sent; listening on generic channels for the session id
    Discovering,
    /// Session id known; listening on scoped channels
    Streaming,
    /// Completion seen; about to send the next queued prompt
    Draining,
    /// Locally reset by a cancel
    Cancelled,
}

/// A transition that is not legal from the current state
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot {event} while {from:?}")]
pub struct InvalidTransition {
    pub from: CoordinatorState,
    pub event: &'static str,
}

type Transition = Result<CoordinatorState, InvalidTransition>;

impl CoordinatorState {
    /// Whether a gateway request is outstanding
    pub fn is_busy(self) -> bool {
        matches!(self, CoordinatorState::Discovering | CoordinatorState::Streaming)
    }

    fn reject(self, event: &'static str) -> Transition {
        Err(InvalidTransition { from: self, event })
    }

    /// A request is about to be sent
    pub fn begin_request(self) -> Transition {
        match self {
            CoordinatorState::Idle | CoordinatorState::Draining | CoordinatorState::Cancelled => {
                Ok(CoordinatorState::Discovering)
            }
            _ => self.reject("begin a request"),
        }
    }

    /// The session id was learned from the stream
    pub fn identified(self) -> Transition {
        match self {
            CoordinatorState::Discovering | CoordinatorState::Streaming => Ok(CoordinatorState::Streaming),
            _ => self.reject("hand off to scoped channels"),
        }
    }

    /// Attached to a process that was already running
    pub fn attach_running(self) -> Transition {
        match self {
            CoordinatorState::Idle | CoordinatorState::Cancelled => Ok(CoordinatorState::Streaming),
            _ => self.reject("attach to a running session"),
        }
    }

    /// The in-flight request completed
    pub fn complete(self, has_queued: bool) -> Transition {
        match self {
            CoordinatorState::Discovering | CoordinatorState::Streaming if has_queued => {
                Ok(CoordinatorState::Draining)
            }
            CoordinatorState::Discovering | CoordinatorState::Streaming => Ok(CoordinatorState::Idle),
            _ => self.reject("complete"),
        }
    }

    /// Sending the request failed outright
    pub fn fail(self) -> Transition {
        Ok(CoordinatorState::Idle)
    }

    /// Local state was reset by a cancel
    pub fn cancel(self) -> Transition {
        Ok(CoordinatorState::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CoordinatorState::*;

    #[test]
    fn test_busy_states() {
        assert!(!Idle.is_busy());
        assert!(Discovering.is_busy());
        assert!(Streaming.is_busy());
        assert!(!Draining.is_busy());
        assert!(!Cancelled.is_busy());
    }

    #[test]
    fn test_happy_path() {
        let s = Idle.begin_request().unwrap();
        assert_eq!(s, Discovering);
        let s = s.identified().unwrap();
        assert_eq!(s, Streaming);
        assert_eq!(s.complete(false).unwrap(), Idle);
        assert_eq!(s.complete(true).unwrap(), Draining);
        assert_eq!(Draining.begin_request().unwrap(), Discovering);
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(Discovering.begin_request().is_err());
        assert!(Streaming.begin_request().is_err());
        assert!(Idle.identified().is_err());
        assert!(Idle.complete(false).is_err());
        assert!(Streaming.attach_running().is_err());
        let err = Streaming.begin_request().unwrap_err();
        assert_eq!(err.from, Streaming);
    }

    #[test]
    fn test_cancel_and_fail_from_anywhere() {
        for s in [Idle, Discovering, Streaming, Draining, Cancelled] {
            assert_eq!(s.cancel().unwrap(), Cancelled);
            assert_eq!(s.fail().unwrap(), Idle);
        }
        assert_eq!(Cancelled.begin_request().unwrap(), Discovering);
        assert_eq!(Cancelled.attach_running().unwrap(), Streaming);
    }
}
