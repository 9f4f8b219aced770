//! Tab registry
//!
//! The registry is the only owner of the tab list and the active tab id.
//! Whether a tab is active is always computed from that id. Coordinators
//! report changes through events, which [`TabRegistry::sync`] applies via
//! the registry's own setters.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::TryRecvError};

use super::store::TabStore;
use super::{TabId, TabRecord};
use crate::bus::EventBus;
use crate::checkpoint::CheckpointHook;
use crate::coordinator::{CoordinatorConfig, SessionCoordinator, SubmitOutcome};
use crate::error::{Error, Result};
use crate::events::{SessionEvent, StreamingStatus};
use crate::gateway::Gateway;
use crate::session::Session;
use crate::translate::Translator;

/// Best-effort callback run when a tab closes
pub type CleanupFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// Defaults applied to every tab's coordinator
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub default_project_path: PathBuf,
    pub default_model: String,
    pub translation_enabled: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let coordinator = CoordinatorConfig::default();
        Self {
            default_project_path: coordinator.project_path,
            default_model: coordinator.default_model,
            translation_enabled: coordinator.translation_enabled,
        }
    }
}

/// Arguments to [`TabRegistry::create_tab`]
#[derive(Debug, Clone)]
pub struct TabSpec {
    /// Existing session to bind (and reconnect to)
    pub session: Option<Session>,
    pub project_path: Option<PathBuf>,
    /// Make the new tab active. Ignored when no tab is active yet.
    pub activate: bool,
}

impl Default for TabSpec {
    fn default() -> Self {
        Self {
            session: None,
            project_path: None,
            activate: true,
        }
    }
}

/// Result of [`TabRegistry::close_tab`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// The tab has unsaved changes; call again with `force` to close it
    NeedsConfirmation,
}

/// Read-only snapshot of one tab for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabView {
    pub id: TabId,
    pub title: String,
    pub is_active: bool,
    pub has_unsaved_changes: bool,
    pub streaming_status: StreamingStatus,
    pub session_id: Option<String>,
    pub queued: usize,
}

struct Tab {
    record: TabRecord,
    has_unsaved_changes: bool,
    streaming_status: StreamingStatus,
    coordinator: SessionCoordinator,
    events: broadcast::Receiver<SessionEvent>,
    cleanup: Option<CleanupFn>,
}

enum Update {
    Status {
        status: StreamingStatus,
        has_unsaved_changes: bool,
    },
    Identified(String),
}

/// Owns every tab and the single active tab id
pub struct TabRegistry {
    gateway: Arc<dyn Gateway>,
    bus: EventBus,
    store: Box<dyn TabStore>,
    config: RegistryConfig,
    translator: Option<Arc<dyn Translator>>,
    checkpoint: Option<Arc<dyn CheckpointHook>>,
    tabs: Vec<Tab>,
    active_tab_id: Option<TabId>,
    untitled_count: usize,
    last_stamp: i64,
}

impl TabRegistry {
    pub fn new(gateway: Arc<dyn Gateway>, bus: EventBus, store: Box<dyn TabStore>, config: RegistryConfig) -> Self {
        Self {
            gateway,
            bus,
            store,
            config,
            translator: None,
            checkpoint: None,
            tabs: Vec::new(),
            active_tab_id: None,
            untitled_count: 0,
            last_stamp: 0,
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn with_checkpoint_hook(mut self, hook: Arc<dyn CheckpointHook>) -> Self {
        self.checkpoint = Some(hook);
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn active_tab_id(&self) -> Option<&TabId> {
        self.active_tab_id.as_ref()
    }

    pub fn is_active(&self, id: &TabId) -> bool {
        self.active_tab_id.as_ref() == Some(id)
    }

    /// Tab ids in display order
    pub fn tab_ids(&self) -> Vec<TabId> {
        self.tabs.iter().map(|t| t.record.id.clone()).collect()
    }

    /// Snapshots of every tab in display order
    pub fn tabs(&self) -> Vec<TabView> {
        self.tabs
            .iter()
            .map(|tab| TabView {
                id: tab.record.id.clone(),
                title: tab.record.title.clone(),
                is_active: self.is_active(&tab.record.id),
                has_unsaved_changes: tab.has_unsaved_changes,
                streaming_status: tab.streaming_status,
                session_id: tab.coordinator.session().map(|s| s.id.clone()),
                queued: tab.coordinator.queued().len(),
            })
            .collect()
    }

    pub fn record(&self, id: &TabId) -> Option<&TabRecord> {
        self.find(id).map(|tab| &tab.record)
    }

    pub fn coordinator(&self, id: &TabId) -> Option<&SessionCoordinator> {
        self.find(id).map(|tab| &tab.coordinator)
    }

    pub fn coordinator_mut(&mut self, id: &TabId) -> Option<&mut SessionCoordinator> {
        self.tabs
            .iter_mut()
            .find(|tab| &tab.record.id == id)
            .map(|tab| &mut tab.coordinator)
    }

    pub fn active_coordinator_mut(&mut self) -> Option<&mut SessionCoordinator> {
        let id = self.active_tab_id.clone()?;
        self.coordinator_mut(&id)
    }

    /// Open a tab. A session-bound tab loads its history and reattaches to
    /// the session's process if it is still running.
    pub async fn create_tab(&mut self, spec: TabSpec) -> Result<TabId> {
        let title = self.derive_title(spec.session.as_ref(), spec.project_path.as_deref());
        let project_path = spec
            .project_path
            .clone()
            .or_else(|| spec.session.as_ref().map(|s| s.project_path.clone()));

        let now = self.stamp();
        let record = TabRecord {
            id: TabId::new(),
            title,
            project_path,
            session_summary: spec.session,
            created_at: now,
            last_activity_at: now,
        };
        let activate = spec.activate || self.active_tab_id.is_none();
        let id = self.open(record, activate).await;

        tracing::debug!("Created tab {} (active: {})", id, self.is_active(&id));
        self.persist();
        Ok(id)
    }

    async fn open(&mut self, record: TabRecord, activate: bool) -> TabId {
        let mut coordinator = self.build_coordinator(&record);
        let events = coordinator.subscribe();

        if !activate {
            coordinator.set_foreground(false).await;
        }
        if record.session_summary.is_some() {
            match coordinator.reconnect().await {
                Ok(true) => tracing::info!("Tab {} reattached to a running session", record.id),
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to reconnect tab {}: {}", record.id, e),
            }
        }

        let id = record.id.clone();
        self.tabs.push(Tab {
            has_unsaved_changes: coordinator.has_unsaved_changes(),
            streaming_status: coordinator.status(),
            record,
            coordinator,
            events,
            cleanup: None,
        });
        if activate {
            self.activate(&id).await;
        }
        id
    }

    fn build_coordinator(&self, record: &TabRecord) -> SessionCoordinator {
        let config = CoordinatorConfig {
            project_path: record
                .project_path
                .clone()
                .unwrap_or_else(|| self.config.default_project_path.clone()),
            default_model: self.config.default_model.clone(),
            translation_enabled: self.config.translation_enabled,
        };
        let mut coordinator = SessionCoordinator::new(self.gateway.clone(), self.bus.clone(), config);
        if let Some(translator) = &self.translator {
            coordinator = coordinator.with_translator(translator.clone());
        }
        if let Some(hook) = &self.checkpoint {
            coordinator = coordinator.with_checkpoint_hook(hook.clone());
        }
        if let Some(session) = &record.session_summary {
            coordinator = coordinator.with_session(session.clone());
        }
        coordinator
    }

    /// Make a tab active. The previous active tab moves to the background
    /// before this one comes forward, so at most one coordinator ever holds
    /// the generic channels.
    pub async fn switch_to_tab(&mut self, id: &TabId) -> Result<()> {
        self.index_of(id)?;
        self.activate(id).await;
        self.sync();
        self.persist();
        Ok(())
    }

    async fn activate(&mut self, id: &TabId) {
        if let Some(previous) = self.active_tab_id.take() {
            if &previous != id {
                if let Some(tab) = self.find_mut(&previous) {
                    tab.coordinator.set_foreground(false).await;
                }
            }
        }
        self.active_tab_id = Some(id.clone());
        let stamp = self.stamp();
        if let Some(tab) = self.find_mut(id) {
            tab.record.last_activity_at = stamp;
            tab.coordinator.set_foreground(true).await;
        }
    }

    /// Close a tab.
    ///
    /// A tab with unsaved changes is only closed with `force`; otherwise the
    /// caller gets [`CloseOutcome::NeedsConfirmation`] and nothing changes.
    pub async fn close_tab(&mut self, id: &TabId, force: bool) -> Result<CloseOutcome> {
        self.sync();
        let index = self.index_of(id)?;
        if self.tabs[index].has_unsaved_changes && !force {
            return Ok(CloseOutcome::NeedsConfirmation);
        }

        let mut tab = self.tabs.remove(index);
        if tab.coordinator.has_unsaved_changes() {
            tab.coordinator.cancel().await;
        }
        tab.coordinator.detach();
        if let Some(cleanup) = tab.cleanup.take() {
            if let Err(e) = cleanup() {
                tracing::warn!("Cleanup for tab {} failed: {}", id, e);
            }
        }

        if self.is_active(id) {
            self.active_tab_id = None;
            let replacement = self
                .tabs
                .iter()
                .max_by_key(|t| t.record.last_activity_at)
                .map(|t| t.record.id.clone());
            if let Some(next) = replacement {
                self.activate(&next).await;
            }
        }

        tracing::debug!("Closed tab {}", id);
        self.persist();
        Ok(CloseOutcome::Closed)
    }

    /// Move a tab from one position to another
    pub fn reorder_tabs(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.tabs.len();
        for index in [from, to] {
            if index >= len {
                return Err(Error::InvalidIndex { index, len });
            }
        }
        let tab = self.tabs.remove(from);
        self.tabs.insert(to, tab);
        self.persist();
        Ok(())
    }

    /// Register the callback run when the tab closes, replacing any earlier one
    pub fn register_cleanup(&mut self, id: &TabId, cleanup: CleanupFn) -> Result<()> {
        self.tab_mut(id)?.cleanup = Some(cleanup);
        Ok(())
    }

    pub fn set_unsaved_changes(&mut self, id: &TabId, has_unsaved_changes: bool) -> Result<()> {
        self.tab_mut(id)?.has_unsaved_changes = has_unsaved_changes;
        Ok(())
    }

    pub fn set_streaming_status(&mut self, id: &TabId, status: StreamingStatus) -> Result<()> {
        self.tab_mut(id)?.streaming_status = status;
        Ok(())
    }

    /// Record activity on a tab
    pub fn touch(&mut self, id: &TabId) -> Result<()> {
        let stamp = self.stamp();
        self.tab_mut(id)?.record.last_activity_at = stamp;
        Ok(())
    }

    /// Apply every pending coordinator event to the tab records
    pub fn sync(&mut self) {
        let mut updates = Vec::new();
        for tab in &mut self.tabs {
            let id = tab.record.id.clone();
            loop {
                match tab.events.try_recv() {
                    Ok(SessionEvent::StatusChanged {
                        status,
                        has_unsaved_changes,
                    }) => updates.push((
                        id.clone(),
                        Update::Status {
                            status,
                            has_unsaved_changes,
                        },
                    )),
                    Ok(SessionEvent::SessionIdentified { session_id }) => {
                        updates.push((id.clone(), Update::Identified(session_id)));
                    }
                    Ok(_) => {}
                    Err(TryRecvError::Lagged(skipped)) => {
                        tracing::debug!("Tab {} skipped {} events, reading state directly", id, skipped);
                        updates.push((
                            id.clone(),
                            Update::Status {
                                status: tab.coordinator.status(),
                                has_unsaved_changes: tab.coordinator.has_unsaved_changes(),
                            },
                        ));
                        if let Some(session) = tab.coordinator.session() {
                            updates.push((id.clone(), Update::Identified(session.id.clone())));
                        }
                    }
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
        }

        let mut structural = false;
        for (id, update) in updates {
            let applied = match update {
                Update::Status {
                    status,
                    has_unsaved_changes,
                } => self
                    .set_streaming_status(&id, status)
                    .and_then(|_| self.set_unsaved_changes(&id, has_unsaved_changes)),
                Update::Identified(session_id) => self.bind_session(&id, session_id).map(|changed| {
                    structural |= changed;
                }),
            };
            if let Err(e) = applied {
                tracing::warn!("Dropping update for tab {}: {}", id, e);
            }
        }
        if structural {
            self.persist();
        }
    }

    fn bind_session(&mut self, id: &TabId, session_id: String) -> Result<bool> {
        let default_path = self.config.default_project_path.clone();
        let tab = self.tab_mut(id)?;
        if tab.record.session_summary.as_ref().is_some_and(|s| s.id == session_id) {
            return Ok(false);
        }
        let project_path = tab.record.project_path.clone().unwrap_or(default_path);
        tab.record.session_summary = Some(Session::new(session_id, project_path));
        Ok(true)
    }

    /// Handle pending deliveries in every coordinator, then sync. Returns
    /// the number of deliveries handled.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        for tab in &mut self.tabs {
            handled += tab.coordinator.process_pending().await;
        }
        self.sync();
        handled
    }

    /// Submit a prompt to the active tab's coordinator
    pub async fn submit_to_active(&mut self, prompt: impl Into<String>, model: Option<String>) -> Result<SubmitOutcome> {
        let id = self.active_tab_id.clone().ok_or(Error::NoActiveTab)?;
        self.touch(&id)?;
        let result = self.tab_mut(&id)?.coordinator.submit(prompt, model).await;
        self.sync();
        result
    }

    /// Restore tabs saved by an earlier run and activate the most recently
    /// used one. Returns how many tabs were restored.
    pub async fn hydrate(&mut self) -> Result<usize> {
        let records = self.store.load()?;
        let count = records.len();

        for record in records {
            self.last_stamp = self.last_stamp.max(record.last_activity_at);
            if let Some(n) = record.title.strip_prefix("Chat ").and_then(|n| n.parse::<usize>().ok()) {
                self.untitled_count = self.untitled_count.max(n);
            }
            self.open(record, false).await;
        }

        let most_recent = self
            .tabs
            .iter()
            .max_by_key(|t| t.record.last_activity_at)
            .map(|t| t.record.id.clone());
        if let Some(id) = most_recent {
            self.activate(&id).await;
        }

        self.sync();
        tracing::info!("Restored {} tabs", count);
        Ok(count)
    }

    fn derive_title(&mut self, session: Option<&Session>, project_path: Option<&Path>) -> String {
        if let Some(session) = session {
            return format!("Session {}", session.short_id());
        }
        if let Some(name) = project_path.and_then(Path::file_name) {
            return name.to_string_lossy().into_owned();
        }
        self.untitled_count += 1;
        format!("Chat {}", self.untitled_count)
    }

    /// Monotonic activity timestamp in unix millis
    fn stamp(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        self.last_stamp = now.max(self.last_stamp + 1);
        self.last_stamp
    }

    fn persist(&self) {
        let records: Vec<TabRecord> = self.tabs.iter().map(|t| t.record.clone()).collect();
        if let Err(e) = self.store.save(&records) {
            tracing::warn!("Failed to save tabs: {}", e);
        }
    }

    fn index_of(&self, id: &TabId) -> Result<usize> {
        self.tabs
            .iter()
            .position(|t| &t.record.id == id)
            .ok_or_else(|| Error::TabNotFound(id.to_string()))
    }

    fn find(&self, id: &TabId) -> Option<&Tab> {
        self.tabs.iter().find(|t| &t.record.id == id)
    }

    fn find_mut(&mut self, id: &TabId) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|t| &t.record.id == id)
    }

    fn tab_mut(&mut self, id: &TabId) -> Result<&mut Tab> {
        self.find_mut(id).ok_or_else(|| Error::TabNotFound(id.to_string()))
    }
}
