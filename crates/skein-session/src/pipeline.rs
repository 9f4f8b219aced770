//! Per-event message pipeline: parse, translate, normalize
//!
//! Failures inside the pipeline never abort a stream. A payload that does
//! not parse is logged and dropped; a translation that fails leaves the
//! message untranslated.

use std::sync::Arc;

use serde_json::Value;
use skein_protocol::{MessageKind, StreamMessage, Usage};

use crate::translate::{Direction, PassthroughTranslator, TranslationCapture, Translator};

/// Transforms raw agent payloads into log-ready messages
#[derive(Clone)]
pub struct MessagePipeline {
    translator: Arc<dyn Translator>,
}

impl Default for MessagePipeline {
    fn default() -> Self {
        Self::new(Arc::new(PassthroughTranslator))
    }
}

impl MessagePipeline {
    pub fn new(translator: Arc<dyn Translator>) -> Self {
        Self { translator }
    }

    /// Translate a prompt for the agent.
    ///
    /// Returns the text to send and the capture to thread through every
    /// inbound message of this request. On failure the original text is sent
    /// and nothing is translated back.
    pub async fn prepare_outbound(&self, prompt: &str, enabled: bool) -> (String, TranslationCapture) {
        if !enabled {
            return (prompt.to_string(), TranslationCapture::default());
        }
        match self.translator.translate(prompt, &Direction::ToAgent).await {
            Ok(translation) => (
                translation.text,
                TranslationCapture {
                    user_language: translation.detected_language,
                },
            ),
            Err(e) => {
                tracing::warn!("Prompt translation failed, sending original text: {}", e);
                (prompt.to_string(), TranslationCapture::default())
            }
        }
    }

    /// Run one raw payload through the pipeline. `None` means the payload was
    /// dropped.
    pub async fn process(&self, raw: &str, capture: &TranslationCapture) -> Option<StreamMessage> {
        match StreamMessage::parse(raw) {
            Ok(message) => Some(self.finish(message, capture).await),
            Err(e) => {
                tracing::warn!("Dropping unparseable agent payload: {} ({})", e, preview(raw));
                None
            }
        }
    }

    /// Run persisted history entries through the pipeline. Entries the log
    /// does not model (summaries, snapshots) are skipped quietly.
    pub async fn process_history(&self, entries: Vec<Value>) -> Vec<StreamMessage> {
        let total = entries.len();
        let mut out = Vec::with_capacity(total);
        for entry in entries {
            match StreamMessage::from_value(entry) {
                Ok(message) => out.push(self.finish(message, &TranslationCapture::default()).await),
                Err(e) => tracing::debug!("Skipping history entry: {}", e),
            }
        }
        if out.len() < total {
            tracing::debug!("Loaded {} of {} history entries", out.len(), total);
        }
        out
    }

    async fn finish(&self, mut message: StreamMessage, capture: &TranslationCapture) -> StreamMessage {
        if let Some(language) = &capture.user_language {
            if matches!(message.kind, MessageKind::Assistant | MessageKind::Result) {
                self.translate_inbound(&mut message, language).await;
            }
        }
        message.usage = Usage::normalize(&message.payload);
        message
    }

    async fn translate_inbound(&self, message: &mut StreamMessage, language: &str) {
        let segments = message.text_segments();
        if segments.is_empty() {
            return;
        }

        let direction = Direction::ToUser {
            language: language.to_string(),
        };
        let mut translated = Vec::with_capacity(segments.len());
        for segment in segments {
            if segment.trim().is_empty() {
                translated.push(segment);
                continue;
            }
            match self.translator.translate(&segment, &direction).await {
                Ok(t) => translated.push(t.text),
                Err(e) => {
                    tracing::warn!("Response translation failed, keeping original text: {}", e);
                    return;
                }
            }
        }
        message.replace_text_segments(translated);
    }
}

fn preview(raw: &str) -> String {
    const MAX: usize = 120;
    let mut chars = raw.chars();
    let head: String = chars.by_ref().take(MAX).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
