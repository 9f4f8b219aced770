//! Mock collaborators shared by the unit tests

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::checkpoint::{CheckpointContext, CheckpointDecision, CheckpointHook};
use crate::error::{Error, GatewayError, Result};
use crate::gateway::{Gateway, RunningSession, SendRequest};
use crate::translate::{Direction, Translation, Translator};

/// A call observed by [`MockGateway`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Start(String),
    Continue(String),
    Resume(String, String),
    Cancel(Option<String>),
    ListRunning,
    LoadHistory(String, String),
}

impl GatewayCall {
    /// Prompt text of a send-style call
    pub fn prompt(&self) -> Option<&str> {
        match self {
            GatewayCall::Start(p) | GatewayCall::Continue(p) | GatewayCall::Resume(_, p) => Some(p),
            _ => None,
        }
    }
}

#[derive(Default)]
struct MockState {
    calls: Vec<GatewayCall>,
    fail_sends: bool,
    fail_resume: bool,
    fail_cancel: bool,
    running: Vec<RunningSession>,
    history: Vec<Value>,
}

/// Gateway that records calls and fails on demand
#[derive(Clone, Default)]
pub struct MockGateway {
    state: Arc<Mutex<MockState>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().calls.clone()
    }

    /// Prompts of every send-style call, in order
    pub fn sent_prompts(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.prompt().map(str::to_string))
            .collect()
    }

    pub fn fail_sends(&self) {
        self.state.lock().fail_sends = true;
    }

    pub fn allow_sends(&self) {
        self.state.lock().fail_sends = false;
    }

    pub fn fail_resume(&self) {
        self.state.lock().fail_resume = true;
    }

    pub fn fail_cancel(&self) {
        self.state.lock().fail_cancel = true;
    }

    pub fn set_running(&self, session_id: &str) {
        self.state.lock().running.push(RunningSession {
            session_id: session_id.to_string(),
            project_path: PathBuf::from("/work/project"),
            started_at: 0,
        });
    }

    pub fn set_history(&self, history: Vec<Value>) {
        self.state.lock().history = history;
    }

    fn record(&self, call: GatewayCall) {
        self.state.lock().calls.push(call);
    }

    fn send_result(&self) -> std::result::Result<(), GatewayError> {
        if self.state.lock().fail_sends {
            return Err(GatewayError::Spawn("agent binary not found".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn start(&self, request: &SendRequest) -> std::result::Result<(), GatewayError> {
        self.record(GatewayCall::Start(request.prompt.clone()));
        self.send_result()
    }

    async fn continue_latest(&self, request: &SendRequest) -> std::result::Result<(), GatewayError> {
        self.record(GatewayCall::Continue(request.prompt.clone()));
        self.send_result()
    }

    async fn resume(&self, session_id: &str, request: &SendRequest) -> std::result::Result<(), GatewayError> {
        self.record(GatewayCall::Resume(session_id.to_string(), request.prompt.clone()));
        if self.state.lock().fail_resume {
            return Err(GatewayError::UnknownSession(session_id.to_string()));
        }
        self.send_result()
    }

    async fn cancel(&self, session_id: Option<&str>) -> std::result::Result<(), GatewayError> {
        self.record(GatewayCall::Cancel(session_id.map(str::to_string)));
        if self.state.lock().fail_cancel {
            return Err(GatewayError::Other("process did not respond".into()));
        }
        Ok(())
    }

    async fn list_running(&self) -> std::result::Result<Vec<RunningSession>, GatewayError> {
        self.record(GatewayCall::ListRunning);
        Ok(self.state.lock().running.clone())
    }

    async fn load_history(
        &self,
        session_id: &str,
        project_id: &str,
    ) -> std::result::Result<Vec<Value>, GatewayError> {
        self.record(GatewayCall::LoadHistory(session_id.to_string(), project_id.to_string()));
        Ok(self.state.lock().history.clone())
    }
}

/// Translator that tags text with its direction so tests can see what ran
pub struct TaggingTranslator {
    detected: String,
}

impl TaggingTranslator {
    pub fn new(detected: &str) -> Self {
        Self {
            detected: detected.to_string(),
        }
    }
}

#[async_trait]
impl Translator for TaggingTranslator {
    async fn translate(&self, text: &str, direction: &Direction) -> Result<Translation> {
        Ok(match direction {
            Direction::ToAgent => Translation {
                text: format!("[agent]{}", text),
                detected_language: Some(self.detected.clone()),
            },
            Direction::ToUser { language } => Translation::unchanged(format!("[{}]{}", language, text)),
        })
    }
}

/// Translator that always fails
pub struct FailingTranslator;

#[async_trait]
impl Translator for FailingTranslator {
    async fn translate(&self, _text: &str, _direction: &Direction) -> Result<Translation> {
        Err(Error::Translation("engine offline".into()))
    }
}

/// Checkpoint hook that records the contexts it was asked about
#[derive(Clone, Default)]
pub struct RecordingCheckpoint {
    pub seen: Arc<Mutex<Vec<CheckpointContext>>>,
}

#[async_trait]
impl CheckpointHook for RecordingCheckpoint {
    async fn evaluate(&self, context: &CheckpointContext) -> Result<CheckpointDecision> {
        self.seen.lock().push(context.clone());
        Ok(CheckpointDecision::Checkpoint {
            reason: "recorded".into(),
        })
    }
}

/// Raw payload helpers
pub fn init_payload(session_id: &str) -> String {
    format!(r#"{{"type":"system","subtype":"init","session_id":"{}"}}"#, session_id)
}

pub fn assistant_payload(session_id: &str, text: &str) -> String {
    serde_json::json!({
        "type": "assistant",
        "session_id": session_id,
        "message": { "content": [{ "type": "text", "text": text }] }
    })
    .to_string()
}
