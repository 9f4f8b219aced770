//! Stream messages emitted by the agent process

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::usage::Usage;

/// Top-level message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    System,
    User,
    Assistant,
    Result,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::System => "system",
            MessageKind::User => "user",
            MessageKind::Assistant => "assistant",
            MessageKind::Result => "result",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "system" => Some(MessageKind::System),
            "user" => Some(MessageKind::User),
            "assistant" => Some(MessageKind::Assistant),
            "result" => Some(MessageKind::Result),
            _ => None,
        }
    }
}

/// One entry of a session's ordered message log.
///
/// The typed header (`kind`, `subtype`, `session_id`) is lifted out of the
/// payload at parse time; the payload itself is kept verbatim so renderers
/// can show tool invocations and results without this crate modelling them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub payload: Value,
    /// Normalized token usage, filled in by the message pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Bus sequence number of the delivery this message came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Local receive time (unix millis)
    pub received_at: i64,
    /// Agent-side timestamp, when the payload carries one (unix millis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<i64>,
}

impl StreamMessage {
    /// Parse one raw payload line
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw.trim())?;
        Self::from_value(value)
    }

    /// Build a message from an already-decoded payload.
    ///
    /// Accepts `type` or `kind` for the message kind and `session_id` or
    /// `sessionId` for the session identifier.
    pub fn from_value(payload: Value) -> Result<Self> {
        if !payload.is_object() {
            return Err(Error::MissingField("type"));
        }

        let kind_name = str_field(&payload, &["type", "kind"]).ok_or(Error::MissingField("type"))?;
        let kind =
            MessageKind::from_name(kind_name).ok_or_else(|| Error::UnknownKind(kind_name.to_string()))?;
        let subtype = str_field(&payload, &["subtype"]).map(str::to_string);
        let session_id = str_field(&payload, &["session_id", "sessionId"]).map(str::to_string);
        let sent_at = payload.get("timestamp").and_then(parse_timestamp);

        Ok(Self {
            kind,
            subtype,
            session_id,
            payload,
            usage: None,
            seq: None,
            received_at: chrono::Utc::now().timestamp_millis(),
            sent_at,
        })
    }

    /// A message typed by the local user
    pub fn user(text: impl Into<String>) -> Self {
        let text = text.into();
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            kind: MessageKind::User,
            subtype: None,
            session_id: None,
            payload: json!({
                "type": "user",
                "message": {
                    "role": "user",
                    "content": [{ "type": "text", "text": text }]
                }
            }),
            usage: None,
            seq: None,
            received_at: now,
            sent_at: Some(now),
        }
    }

    /// A locally generated system notice (`info`, `error`, ...)
    pub fn system(subtype: impl Into<String>, text: impl Into<String>) -> Self {
        let subtype: String = subtype.into();
        let text: String = text.into();
        Self {
            kind: MessageKind::System,
            payload: json!({ "type": "system", "subtype": subtype, "text": text }),
            subtype: Some(subtype),
            session_id: None,
            usage: None,
            seq: None,
            received_at: chrono::Utc::now().timestamp_millis(),
            sent_at: None,
        }
    }

    /// Whether this is the `system/init` message announcing a session
    pub fn is_init(&self) -> bool {
        self.kind == MessageKind::System && self.subtype.as_deref() == Some("init")
    }

    /// Whether this message reports a failure
    pub fn is_error(&self) -> bool {
        let flagged = self
            .payload
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        flagged
            || self
                .subtype
                .as_deref()
                .is_some_and(|s| s == "error" || s.starts_with("error_"))
    }

    /// The text segments of this message, in a stable order
    pub fn text_segments(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_text(&self.payload, &mut out);
        out
    }

    /// Concatenated text content
    pub fn text(&self) -> String {
        self.text_segments().concat()
    }

    /// Replace text segments in place, index-aligned with [`text_segments`].
    ///
    /// Segments that change keep their previous value under the payload's
    /// `original_text` array.
    ///
    /// [`text_segments`]: StreamMessage::text_segments
    pub fn replace_text_segments(&mut self, replacements: Vec<String>) {
        let mut originals = Vec::new();
        for (slot, replacement) in text_slots_mut(&mut self.payload).into_iter().zip(replacements) {
            if *slot != replacement {
                originals.push(Value::String(std::mem::replace(slot, replacement)));
            }
        }
        if !originals.is_empty() {
            if let Value::Object(map) = &mut self.payload {
                map.insert("original_text".to_string(), Value::Array(originals));
            }
        }
    }
}

fn str_field<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| payload.get(*k).and_then(Value::as_str))
}

fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

// Text lives in `message.content`, top-level `content`, a result's `result`,
// or a plain `text` field. Content is either a string or an array of blocks
// of which only `{"type":"text"}` blocks count.

fn collect_text(payload: &Value, out: &mut Vec<String>) {
    let Value::Object(map) = payload else {
        return;
    };
    for (key, value) in map {
        match (key.as_str(), value) {
            ("message", Value::Object(inner)) => {
                if let Some(content) = inner.get("content") {
                    collect_content(content, out);
                }
            }
            ("content", content) => collect_content(content, out),
            ("result" | "text", Value::String(s)) => out.push(s.clone()),
            _ => {}
        }
    }
}

fn collect_content(content: &Value, out: &mut Vec<String>) {
    match content {
        Value::String(s) => out.push(s.clone()),
        Value::Array(blocks) => {
            for block in blocks {
                if block.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        out.push(text.to_string());
                    }
                }
            }
        }
        _ => {}
    }
}

fn text_slots_mut(payload: &mut Value) -> Vec<&mut String> {
    let mut slots = Vec::new();
    let Value::Object(map) = payload else {
        return slots;
    };
    for (key, value) in map.iter_mut() {
        match (key.as_str(), value) {
            ("message", Value::Object(inner)) => {
                if let Some(content) = inner.get_mut("content") {
                    content_slots_mut(content, &mut slots);
                }
            }
            ("content", content) => content_slots_mut(content, &mut slots),
            ("result" | "text", Value::String(s)) => slots.push(s),
            _ => {}
        }
    }
    slots
}

fn content_slots_mut<'a>(content: &'a mut Value, slots: &mut Vec<&'a mut String>) {
    match content {
        Value::String(s) => slots.push(s),
        Value::Array(blocks) => {
            for block in blocks.iter_mut() {
                let is_text = block.get("type").and_then(Value::as_str) == Some("text");
                if !is_text {
                    continue;
                }
                if let Some(Value::String(text)) = block.get_mut("text") {
                    slots.push(text);
                }
            }
        }
        _ => {}
    }
}
