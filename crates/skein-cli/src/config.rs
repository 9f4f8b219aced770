//! Configuration file support

use serde::{Deserialize, Serialize};
use skein_session::{CheckpointHook, CompactionThreshold, EveryNTurns};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_MODEL: &str = "sonnet";
const DEFAULT_AGENT_COMMAND: &str = "claude";

/// Configuration for skein
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model selector passed to the agent
    pub model: Option<String>,
    /// Agent executable
    pub agent_command: Option<String>,
    /// Extra arguments placed before skein's own
    pub agent_args: Vec<String>,
    /// Where the tab list is kept
    pub state_dir: Option<PathBuf>,
    /// Root of the agent's per-project session transcripts
    pub history_dir: Option<PathBuf>,
    /// Report a checkpoint every N completed turns (0 or unset: never)
    pub checkpoint_every: Option<u32>,
    /// Suggest compaction when context use nears this many tokens.
    /// Takes precedence over `checkpoint_every`.
    pub context_window: Option<u64>,
    /// Prompt/response translation
    pub translation: TranslationSettings,
}

/// Translation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationSettings {
    pub enabled: bool,
    /// Shell command that reads text on stdin and prints the translation.
    /// The target language is passed in `SKEIN_TARGET_LANGUAGE`.
    pub command: Option<String>,
    /// Language the user writes in
    pub user_language: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("skein")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("SKEIN_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a file, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to a file
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            model: Some(DEFAULT_MODEL.to_string()),
            agent_command: Some(DEFAULT_AGENT_COMMAND.to_string()),
            checkpoint_every: Some(0),
            ..Default::default()
        };
        default_config.save_to(&path)?;
        Ok(path)
    }

    pub fn model(&self) -> String {
        self.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn agent_command(&self) -> String {
        self.agent_command
            .clone()
            .unwrap_or_else(|| DEFAULT_AGENT_COMMAND.to_string())
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("skein")
        })
    }

    pub fn history_dir(&self) -> PathBuf {
        self.history_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".claude")
                .join("projects")
        })
    }

    /// Checkpoint policy selected by the config, if any
    pub fn checkpoint_hook(&self) -> Option<Arc<dyn CheckpointHook>> {
        if let Some(context_window) = self.context_window.filter(|n| *n > 0) {
            let hook: Arc<dyn CheckpointHook> = Arc::new(CompactionThreshold {
                context_window,
                ..Default::default()
            });
            return Some(hook);
        }
        self.checkpoint_every
            .filter(|n| *n > 0)
            .map(|n| Arc::new(EveryNTurns::new(n)) as Arc<dyn CheckpointHook>)
    }

    /// Translation command, if translation is enabled and configured
    pub fn translation_command(&self) -> Option<&str> {
        if !self.translation.enabled {
            return None;
        }
        self.translation.command.as_deref()
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# skein configuration file
# Place at ~/.config/skein/config.toml (Linux) or set SKEIN_CONFIG_PATH

# Model selector passed to the agent
model = "sonnet"

# Agent executable and extra leading arguments
agent_command = "claude"
agent_args = []

# Where open tabs are remembered between runs
# state_dir = "~/.local/share/skein"

# Where the agent keeps per-project session transcripts
# history_dir = "~/.claude/projects"

# Report a checkpoint every N completed turns (0 = never)
checkpoint_every = 0

# Suggest compaction as context use nears this many tokens (overrides checkpoint_every)
# context_window = 200000

[translation]
enabled = false
# Reads text on stdin, prints the translation; target in $SKEIN_TARGET_LANGUAGE
# command = "trans -b -t $SKEIN_TARGET_LANGUAGE"
# user_language = "fr"
"#
}
