//! Session stream coordinator
//!
//! One coordinator drives one conversation. A request starts on the shared
//! generic channels because the agent only reveals the session id in its
//! first `system/init` message. When that message arrives the coordinator
//! hands off to the session's scoped channels. Completion resets the tracked
//! id so the next request rediscovers it, since the agent may mint a new id
//! on resume.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use skein_protocol::{ChannelKind, ChannelName, StreamMessage};
use tokio::sync::broadcast;

use crate::bus::{Delivery, EventBus, Subscription};
use crate::checkpoint::{CheckpointContext, CheckpointDecision, CheckpointHook, NoCheckpoints};
use crate::error::{GatewayError, Result};
use crate::events::{SessionEvent, StreamingStatus};
use crate::gateway::{Gateway, SendRequest};
use crate::pipeline::MessagePipeline;
use crate::queue::{PromptQueue, QueuedPrompt};
use crate::session::Session;
use crate::state::{CoordinatorState, InvalidTransition};
use crate::transcript::Transcript;
use crate::translate::{TranslationCapture, Translator};

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Working directory for new conversations
    pub project_path: PathBuf,
    /// Model used when a prompt does not name one
    pub default_model: String,
    /// Translate prompts and responses
    pub translation_enabled: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            project_path: PathBuf::from("."),
            default_model: "sonnet".to_string(),
            translation_enabled: false,
        }
    }
}

/// Result of [`SessionCoordinator::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A gateway request was issued
    Sent,
    /// Held behind the in-flight request at this 1-based position
    Queued { position: usize },
}

/// Result of [`SessionCoordinator::cancel`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Nothing was running or queued
    NothingToCancel,
    /// The agent was asked to stop and local state was reset
    Cancelled { dropped_prompts: usize },
    /// The agent could not be reached; local state was reset anyway
    LocalOnly { error: String, dropped_prompts: usize },
}

/// The subscriptions a coordinator currently holds. Never more than one.
enum ListenerSet {
    Generic(Subscription),
    Scoped {
        session_id: String,
        subscription: Subscription,
    },
}

impl ListenerSet {
    fn subscription_mut(&mut self) -> &mut Subscription {
        match self {
            ListenerSet::Generic(subscription) => subscription,
            ListenerSet::Scoped { subscription, .. } => subscription,
        }
    }

    fn is_generic(&self) -> bool {
        matches!(self, ListenerSet::Generic(_))
    }
}

/// Per-request state fixed at submit time
#[derive(Debug, Clone, Default)]
struct InFlight {
    capture: TranslationCapture,
}

/// Drives one conversation's request/response cycle
pub struct SessionCoordinator {
    config: CoordinatorConfig,
    gateway: Arc<dyn Gateway>,
    bus: EventBus,
    pipeline: MessagePipeline,
    checkpoint: Arc<dyn CheckpointHook>,
    session: Option<Session>,
    tracked_session_id: Option<String>,
    listeners: Option<ListenerSet>,
    /// Generic deliveries still queued at handoff, replayed before scoped ones
    backlog: VecDeque<Delivery>,
    transcript: Transcript,
    queue: PromptQueue,
    state: CoordinatorState,
    in_flight: Option<InFlight>,
    foreground: bool,
    completed_turns: u32,
    /// Status shown once nothing is in flight
    settled: StreamingStatus,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionCoordinator {
    /// Create a coordinator for a new conversation
    pub fn new(gateway: Arc<dyn Gateway>, bus: EventBus, config: CoordinatorConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            gateway,
            bus,
            pipeline: MessagePipeline::default(),
            checkpoint: Arc::new(NoCheckpoints),
            session: None,
            tracked_session_id: None,
            listeners: None,
            backlog: VecDeque::new(),
            transcript: Transcript::default(),
            queue: PromptQueue::default(),
            state: CoordinatorState::Idle,
            in_flight: None,
            foreground: true,
            completed_turns: 0,
            settled: StreamingStatus::Idle,
            event_tx,
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.pipeline = MessagePipeline::new(translator);
        self
    }

    pub fn with_checkpoint_hook(mut self, hook: Arc<dyn CheckpointHook>) -> Self {
        self.checkpoint = hook;
        self
    }

    /// Bind a persisted session. Requests resume it and
    /// [`reconnect`](Self::reconnect) can reattach to it.
    pub fn with_session(mut self, session: Session) -> Self {
        self.config.project_path = session.project_path.clone();
        self.session = Some(session);
        self
    }

    /// Subscribe to coordinator events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn messages(&self) -> &[StreamMessage] {
        &self.transcript.messages
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Whether a gateway request is outstanding
    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    /// The session id confirmed for the in-flight request, if any
    pub fn tracked_session_id(&self) -> Option<&str> {
        self.tracked_session_id.as_deref()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn queued(&self) -> &PromptQueue {
        &self.queue
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    pub fn status(&self) -> StreamingStatus {
        if self.state.is_busy() {
            StreamingStatus::Streaming
        } else {
            self.settled
        }
    }

    /// Whether closing now would lose work: a request is running or prompts
    /// are waiting
    pub fn has_unsaved_changes(&self) -> bool {
        self.state.is_busy() || !self.queue.is_empty()
    }

    /// Submit a prompt. If a request is already in flight (or the coordinator
    /// is in the background) the prompt is queued and no request is issued.
    pub async fn submit(&mut self, prompt: impl Into<String>, model: Option<String>) -> Result<SubmitOutcome> {
        let prompt = prompt.into();

        if self.state.is_busy() || !self.foreground {
            let position = self.queue.push(QueuedPrompt::new(prompt, model))?;
            tracing::debug!("Queued prompt at position {}", position);
            self.emit(SessionEvent::Queued { position });
            self.notify_status();
            return Ok(SubmitOutcome::Queued { position });
        }

        // Leftovers from a failed drain go first. If that send fails too the
        // leftover stays at the head and the new prompt is not queued.
        if let Some(next) = self.queue.pop_front() {
            if let Err(e) = self.send(next.text.clone(), next.model.clone()).await {
                self.queue.push_front(next);
                self.notify_status();
                return Err(e);
            }
            let position = self.queue.push(QueuedPrompt::new(prompt, model))?;
            self.emit(SessionEvent::Queued { position });
            self.notify_status();
            return Ok(SubmitOutcome::Queued { position });
        }

        self.send(prompt, model).await?;
        Ok(SubmitOutcome::Sent)
    }

    /// Retract a prompt that has not been sent yet
    pub fn retract(&mut self, prompt_id: &str) -> Option<QueuedPrompt> {
        let removed = self.queue.remove(prompt_id);
        if removed.is_some() {
            self.notify_status();
        }
        removed
    }

    async fn send(&mut self, prompt: String, model: Option<String>) -> Result<()> {
        let next = self.state.begin_request()?;
        self.set_state(next);

        let first_prompt = self.session.is_none() && !self.transcript.has_agent_output();
        let (outbound, capture) = self
            .pipeline
            .prepare_outbound(&prompt, self.config.translation_enabled)
            .await;
        self.in_flight = Some(InFlight { capture });
        self.append(StreamMessage::user(prompt));

        // Listen before asking so the init message cannot be missed
        self.tracked_session_id = None;
        self.backlog.clear();
        self.listeners = Some(ListenerSet::Generic(
            self.bus.subscribe(&ChannelName::generic_triple()),
        ));
        self.notify_status();

        let request = SendRequest {
            project_path: self.config.project_path.clone(),
            prompt: outbound,
            model: model.unwrap_or_else(|| self.config.default_model.clone()),
        };

        if let Err(e) = self.dispatch(&request, first_prompt).await {
            self.fail_request(&e);
            return Err(e.into());
        }
        Ok(())
    }

    async fn dispatch(&self, request: &SendRequest, first_prompt: bool) -> std::result::Result<(), GatewayError> {
        if let Some(session) = &self.session {
            match self.gateway.resume(&session.id, request).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_resume_rejection() => {
                    tracing::debug!("Session {} not recognised, continuing latest: {}", session.id, e);
                }
                Err(e) => {
                    tracing::warn!("Resume of session {} failed, continuing latest: {}", session.id, e);
                }
            }
            return self.gateway.continue_latest(request).await;
        }

        if first_prompt {
            self.gateway.start(request).await
        } else {
            self.gateway.continue_latest(request).await
        }
    }

    fn fail_request(&mut self, error: &GatewayError) {
        tracing::error!("Failed to send prompt: {}", error);
        self.reset_coordination();
        if let Ok(next) = self.state.fail() {
            self.set_state(next);
        }
        self.settled = StreamingStatus::Error;

        let message = error.to_string();
        self.transcript.last_error = Some(message.clone());
        self.append(StreamMessage::system("error", format!("Failed to send prompt: {}", message)));
        self.emit(SessionEvent::Error { message });
        self.notify_status();
    }

    /// Handle every delivery already waiting, without blocking. Returns how
    /// many were handled.
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(delivery) = self.next_ready() {
            self.handle_delivery(delivery).await;
            handled += 1;
        }
        handled
    }

    /// Wait for one delivery and handle it. Returns `false` if no listener
    /// set is held.
    pub async fn next_event(&mut self) -> bool {
        if let Some(delivery) = self.backlog.pop_front() {
            self.handle_delivery(delivery).await;
            return true;
        }
        let Some(listeners) = self.listeners.as_mut() else {
            return false;
        };
        match listeners.subscription_mut().next().await {
            Some(delivery) => {
                self.handle_delivery(delivery).await;
                true
            }
            None => false,
        }
    }

    fn next_ready(&mut self) -> Option<Delivery> {
        if let Some(delivery) = self.backlog.pop_front() {
            return Some(delivery);
        }
        self.listeners.as_mut()?.subscription_mut().try_next()
    }

    /// Route one delivery. A delivery whose sequence number was already seen
    /// (the same event on its generic and scoped channel) is dropped.
    pub async fn handle_delivery(&mut self, delivery: Delivery) {
        if !self.transcript.accept_seq(delivery.seq) {
            tracing::trace!("Dropping duplicate delivery {} on {}", delivery.seq, delivery.channel);
            return;
        }
        match delivery.channel.kind() {
            ChannelKind::Output => self.handle_output(delivery).await,
            ChannelKind::Error => self.handle_error(&delivery),
            ChannelKind::Complete => self.handle_complete(&delivery.payload).await,
        }
    }

    async fn handle_output(&mut self, delivery: Delivery) {
        let capture = self
            .in_flight
            .as_ref()
            .map(|f| f.capture.clone())
            .unwrap_or_default();
        let Some(mut message) = self.pipeline.process(&delivery.payload, &capture).await else {
            return;
        };
        message.seq = Some(delivery.seq);

        if message.is_init() {
            self.handle_init(message);
            return;
        }
        if !self.accepts_session(message.session_id.as_deref()) {
            tracing::debug!(
                "Ignoring {} output for session {:?}",
                message.kind.as_str(),
                message.session_id
            );
            return;
        }
        self.append(message);
    }

    fn handle_init(&mut self, init: StreamMessage) {
        let Some(session_id) = init.session_id.clone() else {
            self.transcript.init = Some(init);
            return;
        };
        if self.tracked_session_id.as_deref() == Some(session_id.as_str()) {
            tracing::trace!("Init for tracked session {} ignored", session_id);
            return;
        }
        if !self.listeners.as_ref().is_some_and(ListenerSet::is_generic) {
            tracing::debug!("Ignoring init for session {} outside discovery", session_id);
            return;
        }
        self.transcript.init = Some(init);
        self.hand_off(session_id);
    }

    fn hand_off(&mut self, session_id: String) {
        let scoped = self.bus.subscribe(&ChannelName::scoped_triple(&session_id));
        let previous = self.listeners.replace(ListenerSet::Scoped {
            session_id: session_id.clone(),
            subscription: scoped,
        });
        if let Some(ListenerSet::Generic(mut generic)) = previous {
            self.backlog.extend(generic.drain());
            generic.unsubscribe();
        }

        self.tracked_session_id = Some(session_id.clone());
        match &mut self.session {
            Some(session) if session.id != session_id => {
                tracing::info!("Agent moved session {} to {}", session.id, session_id);
                session.id = session_id.clone();
            }
            Some(_) => {}
            None => {
                self.session = Some(Session::new(session_id.clone(), self.config.project_path.clone()));
            }
        }

        self.apply(self.state.identified());
        tracing::debug!(
            "Handed off to scoped channels for session {} ({} buffered)",
            session_id,
            self.backlog.len()
        );
        self.emit(SessionEvent::SessionIdentified { session_id });
    }

    // Before handoff only unaddressed output is ours: the agent announces its
    // id with init before anything else, so addressed output seen during
    // discovery belongs to another session streaming on the generic channel.
    fn accepts_session(&self, session_id: Option<&str>) -> bool {
        let Some(id) = session_id else {
            return true;
        };
        match &self.listeners {
            Some(ListenerSet::Generic(_)) => false,
            Some(ListenerSet::Scoped { session_id, .. }) => session_id == id,
            None => true,
        }
    }

    fn handle_error(&mut self, delivery: &Delivery) {
        let text = delivery.payload.trim();
        if text.is_empty() {
            return;
        }
        let session_id = error_session_id(text);
        if !self.accepts_session(session_id.as_deref()) {
            tracing::debug!("Ignoring error for session {:?}", session_id);
            return;
        }
        tracing::error!("Agent error: {}", text);
        self.transcript.last_error = Some(text.to_string());
        self.emit(SessionEvent::Error {
            message: text.to_string(),
        });
    }

    async fn handle_complete(&mut self, payload: &str) {
        let (success, session_id) = parse_completion(payload);
        if !self.accepts_session(session_id.as_deref()) {
            tracing::debug!("Ignoring completion for session {:?}", session_id);
            return;
        }
        if !self.state.is_busy() {
            tracing::debug!("Ignoring completion while {:?}", self.state);
            return;
        }

        let finished = self.tracked_session_id.clone();
        self.reset_coordination();
        self.completed_turns += 1;

        if success {
            self.settled = StreamingStatus::Complete;
        } else {
            self.settled = StreamingStatus::Error;
            let message = "Agent run ended unsuccessfully".to_string();
            self.transcript.last_error = Some(message.clone());
            self.append(StreamMessage::system("error", message));
        }

        let has_queued = self.foreground && !self.queue.is_empty();
        self.apply(self.state.complete(has_queued));
        self.notify_status();

        self.evaluate_checkpoint(finished, success).await;

        if has_queued {
            // Let observers render the finished turn first
            tokio::task::yield_now().await;
            self.drain_next().await;
        }
    }

    async fn evaluate_checkpoint(&mut self, session_id: Option<String>, success: bool) {
        let context = CheckpointContext {
            session_id: session_id.or_else(|| self.session.as_ref().map(|s| s.id.clone())),
            project_path: self.config.project_path.clone(),
            completed_turns: self.completed_turns,
            message_count: self.transcript.len(),
            total_usage: self.transcript.total_usage,
            success,
        };
        match self.checkpoint.evaluate(&context).await {
            Ok(decision) => {
                if decision != CheckpointDecision::Skip {
                    tracing::info!("Checkpoint hook decided {:?}", decision);
                }
                self.emit(SessionEvent::Checkpoint { decision });
            }
            Err(e) => tracing::warn!("Checkpoint evaluation failed: {}", e),
        }
    }

    async fn drain_next(&mut self) {
        let Some(next) = self.queue.pop_front() else {
            return;
        };
        tracing::debug!("Sending queued prompt {} ({} left)", next.id, self.queue.len());
        if let Err(e) = self.send(next.text.clone(), next.model.clone()).await {
            tracing::warn!("Queued prompt could not be sent: {}", e);
            self.queue.push_front(next);
            self.notify_status();
        }
    }

    /// Stop the in-flight request and drop queued prompts.
    ///
    /// Local state is reset whether or not the agent acknowledged the
    /// cancel, so the coordinator is never left busy.
    pub async fn cancel(&mut self) -> CancelOutcome {
        if !self.state.is_busy() && self.queue.is_empty() {
            return CancelOutcome::NothingToCancel;
        }

        let result = if self.state.is_busy() {
            self.gateway.cancel(self.tracked_session_id.as_deref()).await
        } else {
            Ok(())
        };

        self.reset_coordination();
        let dropped_prompts = self.queue.clear();
        self.apply(self.state.cancel());
        self.settled = StreamingStatus::Idle;

        let outcome = match result {
            Ok(()) => {
                self.append(StreamMessage::system("info", "Request cancelled"));
                CancelOutcome::Cancelled { dropped_prompts }
            }
            Err(e) => {
                tracing::warn!("Cancel request failed, local state reset anyway: {}", e);
                self.append(StreamMessage::system(
                    "error",
                    format!("Cancel could not reach the agent: {}", e),
                ));
                CancelOutcome::LocalOnly {
                    error: e.to_string(),
                    dropped_prompts,
                }
            }
        };
        self.notify_status();
        outcome
    }

    /// Restore a bound session: load its history, then reattach to its
    /// scoped channels if its process is still running. Returns whether the
    /// coordinator reattached.
    pub async fn reconnect(&mut self) -> Result<bool> {
        let Some(session) = self.session.clone() else {
            return Ok(false);
        };

        if self.transcript.is_empty() {
            let project_id = self.gateway.project_id(&session.project_path);
            match self.gateway.load_history(&session.id, &project_id).await {
                Ok(entries) => {
                    for message in self.pipeline.process_history(entries).await {
                        if message.is_init() {
                            self.transcript.init = Some(message);
                        } else {
                            self.append(message);
                        }
                    }
                }
                Err(e) => tracing::warn!("Failed to load history for session {}: {}", session.id, e),
            }
        }

        let running = self.gateway.list_running().await?;
        if !running.iter().any(|r| r.session_id == session.id) {
            return Ok(false);
        }

        let next = self.state.attach_running()?;
        self.set_state(next);
        self.listeners = Some(ListenerSet::Scoped {
            session_id: session.id.clone(),
            subscription: self.bus.subscribe(&ChannelName::scoped_triple(&session.id)),
        });
        self.tracked_session_id = Some(session.id.clone());
        self.in_flight = Some(InFlight::default());
        tracing::info!("Reattached to running session {}", session.id);
        self.notify_status();
        Ok(true)
    }

    /// Move the coordinator to the foreground or background.
    ///
    /// A background coordinator holds no generic subscription and defers
    /// queued prompts. Scoped subscriptions are kept so identified sessions
    /// keep streaming.
    pub async fn set_foreground(&mut self, foreground: bool) {
        if self.foreground == foreground {
            return;
        }
        self.foreground = foreground;

        if !foreground {
            if self.listeners.as_ref().is_some_and(ListenerSet::is_generic) {
                self.listeners = None;
                tracing::debug!("Released generic listeners for background");
            }
            return;
        }

        if self.state == CoordinatorState::Discovering && self.listeners.is_none() {
            self.listeners = Some(ListenerSet::Generic(
                self.bus.subscribe(&ChannelName::generic_triple()),
            ));
            tracing::debug!("Reattached generic listeners in foreground");
        }
        if !self.state.is_busy() && !self.queue.is_empty() {
            self.drain_next().await;
        }
    }

    /// Release every subscription. Used when the owning tab closes.
    pub fn detach(&mut self) {
        self.listeners = None;
        self.backlog.clear();
    }

    fn reset_coordination(&mut self) {
        self.listeners = None;
        self.backlog.clear();
        self.tracked_session_id = None;
        self.in_flight = None;
    }

    fn apply(&mut self, transition: std::result::Result<CoordinatorState, InvalidTransition>) {
        match transition {
            Ok(next) => self.set_state(next),
            Err(e) => tracing::warn!("Ignoring state transition: {}", e),
        }
    }

    fn set_state(&mut self, next: CoordinatorState) {
        if next != self.state {
            tracing::trace!("Coordinator {:?} -> {:?}", self.state, next);
        }
        self.state = next;
    }

    fn append(&mut self, message: StreamMessage) {
        self.transcript.push(message);
        self.emit(SessionEvent::MessageAppended {
            index: self.transcript.len() - 1,
        });
    }

    fn notify_status(&self) {
        self.emit(SessionEvent::StatusChanged {
            status: self.status(),
            has_unsaved_changes: self.has_unsaved_changes(),
        });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Session named by a structured error payload, if any
fn error_session_id(payload: &str) -> Option<String> {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(payload) else {
        return None;
    };
    map.get("session_id")
        .or_else(|| map.get("sessionId"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Completion payloads are `true`/`false` or `{"success": bool, "session_id": ...}`.
/// Anything else counts as a successful completion.
fn parse_completion(payload: &str) -> (bool, Option<String>) {
    match serde_json::from_str::<Value>(payload.trim()) {
        Ok(Value::Bool(success)) => (success, None),
        Ok(Value::Object(map)) => {
            let success = map.get("success").and_then(Value::as_bool).unwrap_or(true);
            let session_id = map
                .get("session_id")
                .or_else(|| map.get("sessionId"))
                .and_then(Value::as_str)
                .map(str::to_string);
            (success, session_id)
        }
        _ => (true, None),
    }
}
