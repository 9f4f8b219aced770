//! skein-session: Session stream coordination
//!
//! This crate drives conversations with an external agent process. Each
//! conversation is owned by a [`SessionCoordinator`], which discovers the
//! session's identity from the event stream, hands off from the shared
//! generic channels to session-scoped ones, keeps an ordered message log,
//! and queues prompts so at most one request is in flight. A [`TabRegistry`]
//! owns many coordinators and enforces the single-active-tab rule.

pub mod bus;
pub mod checkpoint;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod gateway;
pub mod pipeline;
pub mod queue;
pub mod session;
pub mod state;
pub mod tabs;
pub mod transcript;
pub mod translate;

#[cfg(test)]
pub(crate) mod test_support;

pub use bus::{Delivery, EventBus, Subscription};
pub use checkpoint::{CheckpointContext, CheckpointDecision, CheckpointHook, CompactionThreshold, EveryNTurns, NoCheckpoints};
pub use coordinator::{CancelOutcome, CoordinatorConfig, SessionCoordinator, SubmitOutcome};
pub use error::{Error, GatewayError, Result};
pub use events::{SessionEvent, StreamingStatus};
pub use gateway::{Gateway, RunningSession, SendRequest};
pub use pipeline::MessagePipeline;
pub use queue::{PromptQueue, QueuedPrompt};
pub use session::Session;
pub use state::CoordinatorState;
pub use tabs::{CleanupFn, CloseOutcome, MemoryTabStore, RegistryConfig, TabId, TabRecord, TabRegistry, TabSpec, TabStore, TabView};
pub use transcript::Transcript;
pub use translate::{Direction, PassthroughTranslator, Translation, TranslationCapture, Translator};
