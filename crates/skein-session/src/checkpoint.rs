//! Checkpoint evaluation after a completed request
//!
//! The coordinator asks a [`CheckpointHook`] after every completion whether
//! the session should be checkpointed or compacted. Acting on the decision is
//! the hook owner's business; the coordinator only reports it.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skein_protocol::Usage;

use crate::error::Result;

/// What the coordinator knows at completion time
#[derive(Debug, Clone)]
pub struct CheckpointContext {
    pub session_id: Option<String>,
    pub project_path: PathBuf,
    /// Requests completed by this coordinator so far
    pub completed_turns: u32,
    pub message_count: usize,
    pub total_usage: Usage,
    /// Whether the agent reported success
    pub success: bool,
}

/// Outcome of a checkpoint evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckpointDecision {
    Skip,
    Checkpoint { reason: String },
    Compact { reason: String },
}

/// External checkpoint / auto-compaction policy
#[async_trait]
pub trait CheckpointHook: Send + Sync {
    async fn evaluate(&self, context: &CheckpointContext) -> Result<CheckpointDecision>;
}

/// Never checkpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCheckpoints;

#[async_trait]
impl CheckpointHook for NoCheckpoints {
    async fn evaluate(&self, _context: &CheckpointContext) -> Result<CheckpointDecision> {
        Ok(CheckpointDecision::Skip)
    }
}

/// Checkpoint after every `n` successful turns
#[derive(Debug, Clone, Copy)]
pub struct EveryNTurns {
    n: u32,
}

impl EveryNTurns {
    pub fn new(n: u32) -> Self {
        Self { n }
    }
}

#[async_trait]
impl CheckpointHook for EveryNTurns {
    async fn evaluate(&self, context: &CheckpointContext) -> Result<CheckpointDecision> {
        if self.n == 0 || !context.success || context.completed_turns % self.n != 0 {
            return Ok(CheckpointDecision::Skip);
        }
        Ok(CheckpointDecision::Checkpoint {
            reason: format!("{} turns completed", context.completed_turns),
        })
    }
}

/// Suggest compaction once the context in use approaches a window limit
#[derive(Debug, Clone, Copy)]
pub struct CompactionThreshold {
    /// Context window size in tokens
    pub context_window: u64,
    /// Tokens to keep free for the next response
    pub reserve_tokens: u64,
}

impl Default for CompactionThreshold {
    fn default() -> Self {
        Self {
            context_window: 200_000,
            reserve_tokens: 16_384,
        }
    }
}

#[async_trait]
impl CheckpointHook for CompactionThreshold {
    async fn evaluate(&self, context: &CheckpointContext) -> Result<CheckpointDecision> {
        let used = context.total_usage.input + context.total_usage.cache_read;
        let limit = self.context_window.saturating_sub(self.reserve_tokens);
        if used > limit {
            return Ok(CheckpointDecision::Compact {
                reason: format!("{} tokens in context exceeds {}", used, limit),
            });
        }
        Ok(CheckpointDecision::Skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(turns: u32, success: bool, input: u64) -> CheckpointContext {
        CheckpointContext {
            session_id: Some("s".into()),
            project_path: PathBuf::from("/tmp"),
            completed_turns: turns,
            message_count: 4,
            total_usage: Usage {
                input,
                ..Default::default()
            },
            success,
        }
    }

    #[tokio::test]
    async fn test_every_n_turns() {
        let hook = EveryNTurns::new(2);
        assert_eq!(hook.evaluate(&context(1, true, 0)).await.unwrap(), CheckpointDecision::Skip);
        assert!(matches!(
            hook.evaluate(&context(2, true, 0)).await.unwrap(),
            CheckpointDecision::Checkpoint { .. }
        ));
        assert_eq!(hook.evaluate(&context(2, false, 0)).await.unwrap(), CheckpointDecision::Skip);
        assert_eq!(
            EveryNTurns::new(0).evaluate(&context(2, true, 0)).await.unwrap(),
            CheckpointDecision::Skip
        );
    }

    #[tokio::test]
    async fn test_compaction_threshold() {
        let hook = CompactionThreshold {
            context_window: 1000,
            reserve_tokens: 100,
        };
        assert_eq!(hook.evaluate(&context(1, true, 900)).await.unwrap(), CheckpointDecision::Skip);
        assert!(matches!(
            hook.evaluate(&context(1, true, 901)).await.unwrap(),
            CheckpointDecision::Compact { .. }
        ));
    }
}
