//! FIFO queue of prompts submitted while a request is in flight

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum number of prompts held in the queue
pub const MAX_QUEUED_PROMPTS: usize = 100;

/// A prompt waiting for the in-flight request to complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedPrompt {
    pub id: String,
    pub text: String,
    /// Model selector; `None` uses the coordinator default
    pub model: Option<String>,
    /// Unix millis
    pub queued_at: i64,
}

impl QueuedPrompt {
    pub fn new(text: impl Into<String>, model: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            model,
            queued_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Prompt queue. Consumed strictly front to back.
#[derive(Debug, Clone, Default)]
pub struct PromptQueue {
    items: VecDeque<QueuedPrompt>,
}

impl PromptQueue {
    /// Enqueue a prompt; returns its 1-based position. A full queue rejects
    /// the new prompt and keeps the ones already waiting.
    pub fn push(&mut self, prompt: QueuedPrompt) -> Result<usize> {
        if self.items.len() >= MAX_QUEUED_PROMPTS {
            return Err(Error::QueueFull(MAX_QUEUED_PROMPTS));
        }
        self.items.push_back(prompt);
        Ok(self.items.len())
    }

    pub fn pop_front(&mut self) -> Option<QueuedPrompt> {
        self.items.pop_front()
    }

    /// Put back a prompt whose send failed so it is still next in line
    pub fn push_front(&mut self, prompt: QueuedPrompt) {
        self.items.push_front(prompt);
    }

    /// Retract a prompt that has not been sent yet
    pub fn remove(&mut self, id: &str) -> Option<QueuedPrompt> {
        let index = self.items.iter().position(|p| p.id == id)?;
        self.items.remove(index)
    }

    /// Drop everything; returns how many prompts were discarded
    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedPrompt> {
        self.items.iter()
    }
}
