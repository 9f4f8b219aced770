//! Translation collaborator
//!
//! When translation is enabled, a prompt is translated for the agent at
//! submit time. What the translator learned then (the user's language) is
//! captured in a [`TranslationCapture`] and handed to every later pipeline
//! call for that request, so inbound messages are translated back using the
//! value known at submit time.

use async_trait::async_trait;

use crate::error::Result;

/// Which way a piece of text is going
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Direction {
    /// User text on its way to the agent
    ToAgent,
    /// Agent text on its way back to a user writing in `language`
    ToUser { language: String },
}

/// A translated text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub text: String,
    /// Language of the input, when the translator detected one that needs
    /// translating back
    pub detected_language: Option<String>,
}

impl Translation {
    /// Text that needed no translation
    pub fn unchanged(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            detected_language: None,
        }
    }
}

/// External translation engine
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, direction: &Direction) -> Result<Translation>;
}

/// Identity translator
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTranslator;

#[async_trait]
impl Translator for PassthroughTranslator {
    async fn translate(&self, text: &str, _direction: &Direction) -> Result<Translation> {
        Ok(Translation::unchanged(text))
    }
}

/// Translation state captured when a request was submitted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationCapture {
    /// Language to translate agent output back into, if any
    pub user_language: Option<String>,
}

impl TranslationCapture {
    pub fn for_language(language: impl Into<String>) -> Self {
        Self {
            user_language: Some(language.into()),
        }
    }
}
