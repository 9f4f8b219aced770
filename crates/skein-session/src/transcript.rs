//! Ordered message log of one session

use skein_protocol::{MessageKind, StreamMessage, Usage};

/// Message log, usage totals, and delivery bookkeeping for one session.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    /// Messages in delivery order
    pub messages: Vec<StreamMessage>,
    /// Latest `system/init` payload (model, tools, cwd); not part of the log
    pub init: Option<StreamMessage>,
    /// Usage summed over assistant messages
    pub total_usage: Usage,
    /// Last error reported by the agent or a failed request
    pub last_error: Option<String>,
    /// Highest delivery sequence number accepted so far
    high_water: Option<u64>,
    /// Agent message id whose usage was last counted
    last_counted_message: Option<String>,
}

impl Transcript {
    /// Append a message, folding its usage into the totals.
    ///
    /// The agent may split one model response into several assistant
    /// messages sharing an id and a usage block; that usage is counted once.
    pub fn push(&mut self, message: StreamMessage) {
        if message.kind == MessageKind::Assistant {
            if let Some(usage) = &message.usage {
                let message_id = message
                    .payload
                    .get("message")
                    .and_then(|m| m.get("id"))
                    .and_then(|id| id.as_str())
                    .map(str::to_string);
                let already_counted = message_id.is_some() && message_id == self.last_counted_message;
                if !already_counted {
                    self.total_usage.accumulate(usage);
                    self.last_counted_message = message_id;
                }
            }
        }
        self.messages.push(message);
    }

    /// Record a delivery sequence number. Returns `false` if it was already
    /// seen (the delivery is a duplicate and must be dropped).
    pub fn accept_seq(&mut self, seq: u64) -> bool {
        match self.high_water {
            Some(high) if seq <= high => false,
            _ => {
                self.high_water = Some(seq);
                true
            }
        }
    }

    /// Whether the agent has produced any output in this log
    pub fn has_agent_output(&self) -> bool {
        self.messages
            .iter()
            .any(|m| matches!(m.kind, MessageKind::Assistant | MessageKind::Result))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&StreamMessage> {
        self.messages.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assistant(id: &str, input: u64) -> StreamMessage {
        let mut msg = StreamMessage::from_value(json!({
            "type": "assistant",
            "message": { "id": id, "content": [{ "type": "text", "text": "hi" }] }
        }))
        .unwrap();
        msg.usage = Some(Usage {
            input,
            ..Default::default()
        });
        msg
    }

    #[test]
    fn test_accept_seq_rejects_duplicates_and_older() {
        let mut t = Transcript::default();
        assert!(t.accept_seq(3));
        assert!(!t.accept_seq(3));
        assert!(!t.accept_seq(2));
        assert!(t.accept_seq(4));
    }

    #[test]
    fn test_usage_counted_once_per_message_id() {
        let mut t = Transcript::default();
        t.push(assistant("msg_1", 10));
        t.push(assistant("msg_1", 10));
        t.push(assistant("msg_2", 5));
        assert_eq!(t.len(), 3);
        assert_eq!(t.total_usage.input, 15);
    }

    #[test]
    fn test_result_usage_not_summed() {
        let mut t = Transcript::default();
        let mut result = StreamMessage::from_value(json!({ "type": "result", "result": "ok" })).unwrap();
        result.usage = Some(Usage {
            input: 100,
            ..Default::default()
        });
        t.push(result);
        assert_eq!(t.total_usage.input, 0);
        assert!(t.has_agent_output());
    }

    #[test]
    fn test_user_messages_are_not_agent_output() {
        let mut t = Transcript::default();
        t.push(StreamMessage::user("hello"));
        t.push(StreamMessage::system("info", "note"));
        assert!(!t.has_agent_output());
    }
}
