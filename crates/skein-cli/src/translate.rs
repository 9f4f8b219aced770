//! Translation through an external shell command

use std::process::Stdio;

use async_trait::async_trait;
use skein_session::{Direction, Error, Result, Translation, Translator};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Language the agent is addressed in
const AGENT_LANGUAGE: &str = "en";

/// Pipes text through `sh -c <command>`
///
/// The command reads the text on stdin and prints the translation. The
/// target language is passed in `SKEIN_TARGET_LANGUAGE`.
pub struct CommandTranslator {
    command: String,
    user_language: Option<String>,
}

impl CommandTranslator {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            user_language: None,
        }
    }

    /// Language to translate agent output back into
    pub fn with_user_language(mut self, language: impl Into<String>) -> Self {
        self.user_language = Some(language.into());
        self
    }

    async fn run(&self, text: &str, target: &str) -> Result<String> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("SKEIN_TARGET_LANGUAGE", target)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Translation(format!("failed to run translator: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(text.as_bytes()).await {
                Ok(()) => {}
                // The command may finish without reading its input
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(Error::Translation(e.to_string())),
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::Translation(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Translation(format!(
                "translator exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

#[async_trait]
impl Translator for CommandTranslator {
    async fn translate(&self, text: &str, direction: &Direction) -> Result<Translation> {
        match direction {
            Direction::ToAgent => {
                let translated = self.run(text, AGENT_LANGUAGE).await?;
                // Unchanged output means the prompt was already in the agent's language
                let detected_language = if translated.trim() != text.trim() {
                    self.user_language.clone()
                } else {
                    None
                };
                Ok(Translation {
                    text: translated,
                    detected_language,
                })
            }
            Direction::ToUser { language } => {
                Ok(Translation::unchanged(self.run(text, language).await?))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identity_command_detects_nothing() {
        let translator = CommandTranslator::new("cat").with_user_language("fr");
        let translation = translator.translate("hello", &Direction::ToAgent).await.unwrap();
        assert_eq!(translation.text, "hello");
        assert_eq!(translation.detected_language, None);
    }

    #[tokio::test]
    async fn test_changed_text_reports_user_language() {
        let translator = CommandTranslator::new("tr a-z A-Z").with_user_language("fr");
        let translation = translator.translate("bonjour", &Direction::ToAgent).await.unwrap();
        assert_eq!(translation.text, "BONJOUR");
        assert_eq!(translation.detected_language.as_deref(), Some("fr"));
    }

    #[tokio::test]
    async fn test_target_language_is_exported() {
        let translator = CommandTranslator::new("printf '%s' \"$SKEIN_TARGET_LANGUAGE\"");
        let back = translator
            .translate("ignored", &Direction::ToUser { language: "de".into() })
            .await
            .unwrap();
        assert_eq!(back.text, "de");
        assert_eq!(back.detected_language, None);
    }

    #[tokio::test]
    async fn test_failing_command() {
        let translator = CommandTranslator::new("echo broken >&2; exit 3");
        let err = translator.translate("x", &Direction::ToAgent).await.unwrap_err();
        assert!(matches!(err, Error::Translation(msg) if msg.contains("broken")));
    }
}
