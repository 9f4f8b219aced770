//! Token usage accounting
//!
//! Agents report token counters under several naming conventions
//! (snake_case API names, camelCase SDK names, OpenAI-style prompt/completion
//! names). [`Usage::normalize`] reconciles them into one shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const INPUT_KEYS: &[&str] = &["input_tokens", "inputTokens", "prompt_tokens", "promptTokens"];
const OUTPUT_KEYS: &[&str] = &[
    "output_tokens",
    "outputTokens",
    "completion_tokens",
    "completionTokens",
];
const CACHE_WRITE_KEYS: &[&str] = &[
    "cache_creation_input_tokens",
    "cacheCreationInputTokens",
    "cache_write_tokens",
    "cacheWriteTokens",
];
const CACHE_READ_KEYS: &[&str] = &[
    "cache_read_input_tokens",
    "cacheReadInputTokens",
    "cache_read_tokens",
    "cacheReadTokens",
];

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub cache_write: u64,
    pub cache_read: u64,
}

impl Usage {
    /// Extract usage from a raw agent payload.
    ///
    /// Looks at `message.usage` first (assistant messages), then a top-level
    /// `usage` object (result messages). Returns `None` when neither object
    /// carries any recognised counter.
    pub fn normalize(payload: &Value) -> Option<Usage> {
        let candidates = [
            payload.get("message").and_then(|m| m.get("usage")),
            payload.get("usage"),
        ];
        candidates
            .into_iter()
            .flatten()
            .find_map(Self::from_counters)
    }

    fn from_counters(obj: &Value) -> Option<Usage> {
        let input = first_count(obj, INPUT_KEYS);
        let output = first_count(obj, OUTPUT_KEYS);
        let cache_write = first_count(obj, CACHE_WRITE_KEYS);
        let cache_read = first_count(obj, CACHE_READ_KEYS);

        if input.is_none() && output.is_none() && cache_write.is_none() && cache_read.is_none() {
            return None;
        }

        Some(Usage {
            input: input.unwrap_or(0),
            output: output.unwrap_or(0),
            cache_write: cache_write.unwrap_or(0),
            cache_read: cache_read.unwrap_or(0),
        })
    }

    /// Sum of all counters
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_write + self.cache_read
    }

    /// Add another usage record into this one
    pub fn accumulate(&mut self, other: &Usage) {
        self.input += other.input;
        self.output += other.output;
        self.cache_write += other.cache_write;
        self.cache_read += other.cache_read;
    }
}

/// Read the first present counter among `keys`. Counters may arrive as
/// integers, floats, or numeric strings.
fn first_count(obj: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| match obj.get(*key)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
