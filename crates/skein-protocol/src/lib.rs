//! skein-protocol: Wire vocabulary for agent stream events
//!
//! This crate names the event channels an agent process publishes on and
//! parses the raw payloads it emits into typed [`StreamMessage`]s, including
//! reconciliation of the token-usage counters the agent reports.

pub mod channel;
pub mod error;
pub mod message;
pub mod usage;

pub use channel::{ChannelKind, ChannelName};
pub use error::{Error, Result};
pub use message::{MessageKind, StreamMessage};
pub use usage::Usage;
