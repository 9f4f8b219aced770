//! Line-oriented rendering of the active tab's message log

use std::collections::HashMap;
use std::io::{self, Write};

use serde_json::Value;
use skein_protocol::{MessageKind, StreamMessage};
use skein_session::{TabId, TabRegistry};

/// Prints each tab's messages once, as they arrive.
///
/// Only the active tab is printed. Messages that arrive while a tab is in
/// the background are printed when it becomes active again.
#[derive(Debug, Default)]
pub struct Renderer {
    printed: HashMap<TabId, usize>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print the active tab's unprinted messages
    pub fn render_active(&mut self, registry: &TabRegistry, out: &mut impl Write) -> io::Result<usize> {
        let Some(id) = registry.active_tab_id() else {
            return Ok(0);
        };
        let Some(coordinator) = registry.coordinator(id) else {
            return Ok(0);
        };
        let messages = coordinator.messages();
        let printed = self.printed.entry(id.clone()).or_default();
        // The log only grows, except when a tab is rebuilt from history
        if *printed > messages.len() {
            *printed = 0;
        }

        let mut lines = 0;
        for message in &messages[*printed..] {
            if let Some(text) = format_message(message) {
                writeln!(out, "{}", text)?;
                lines += 1;
            }
        }
        *printed = messages.len();
        out.flush()?;
        Ok(lines)
    }

    /// Drop bookkeeping for a closed tab
    pub fn forget(&mut self, id: &TabId) {
        self.printed.remove(id);
    }
}

/// One display line (possibly multi-line) for a message, or `None` for
/// messages with nothing to show
pub fn format_message(message: &StreamMessage) -> Option<String> {
    match message.kind {
        MessageKind::User => {
            let text = message.text();
            if text.is_empty() {
                // Tool results come back as user messages
                return None;
            }
            Some(format!("you: {}", text))
        }
        MessageKind::Assistant => {
            let mut parts = Vec::new();
            let text = message.text();
            if !text.is_empty() {
                parts.push(text);
            }
            for name in tool_uses(&message.payload) {
                parts.push(format!("[Running {}...]", name));
            }
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        MessageKind::Result => {
            let cost = message
                .payload
                .get("total_cost_usd")
                .and_then(Value::as_f64)
                .map(|c| format!(" (${:.4})", c))
                .unwrap_or_default();
            if message.is_error() {
                Some(format!("[Request failed{}]", cost))
            } else {
                Some(format!("[Done{}]", cost))
            }
        }
        MessageKind::System => {
            let text = message.text();
            match message.subtype.as_deref() {
                Some("init") => None,
                _ if message.is_error() => Some(format!("Error: {}", text)),
                _ if text.is_empty() => None,
                _ => Some(format!("[{}]", text)),
            }
        }
    }
}

fn tool_uses(payload: &Value) -> Vec<&str> {
    payload
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
                .filter_map(|b| b.get("name").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_util::registry_with_tabs;

    fn parse(raw: &str) -> StreamMessage {
        StreamMessage::parse(raw).unwrap()
    }

    #[test]
    fn test_format_user_and_assistant() {
        assert_eq!(format_message(&StreamMessage::user("hi")).as_deref(), Some("you: hi"));

        let assistant = parse(
            r#"{"type":"assistant","message":{"content":[
                {"type":"text","text":"Looking."},
                {"type":"tool_use","name":"Read","input":{}}
            ]}}"#,
        );
        assert_eq!(format_message(&assistant).as_deref(), Some("Looking.\n[Running Read...]"));
    }

    #[test]
    fn test_format_result_and_system() {
        let done = parse(r#"{"type":"result","subtype":"success","result":"ok","total_cost_usd":0.0123}"#);
        assert_eq!(format_message(&done).as_deref(), Some("[Done ($0.0123)]"));

        let failed = parse(r#"{"type":"result","subtype":"error_during_execution","is_error":true}"#);
        assert_eq!(format_message(&failed).as_deref(), Some("[Request failed]"));

        let error = StreamMessage::system("error", "agent exited");
        assert_eq!(format_message(&error).as_deref(), Some("Error: agent exited"));

        let init = parse(r#"{"type":"system","subtype":"init","session_id":"s"}"#);
        assert_eq!(format_message(&init), None);
    }

    #[tokio::test]
    async fn test_renders_each_message_once() {
        let mut registry = registry_with_tabs(1).await;
        let mut renderer = Renderer::new();
        let mut out = Vec::new();

        registry.submit_to_active("hello", None).await.unwrap();
        assert_eq!(renderer.render_active(&registry, &mut out).unwrap(), 1);
        assert_eq!(renderer.render_active(&registry, &mut out).unwrap(), 0);
        assert_eq!(String::from_utf8(out).unwrap(), "you: hello\n");
    }
}
