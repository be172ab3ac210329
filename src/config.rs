//! Configuration types for the conversation core.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConversationError, Result};
use crate::index_map::{Comparer, PatternMapping};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ColloquyConfig {
    /// Orchestrator behaviour.
    pub conversation: ConversationConfig,
    /// Streaming chat backend.
    pub backend: BackendConfig,
    /// Code execution.
    pub execution: ExecutionConfig,
    /// Speech text rewriting.
    pub speech: SpeechConfig,
    /// Log filtering.
    pub logging: LoggingConfig,
}

/// Conversation orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Seeded as the first history message when set.
    pub system_prompt: Option<String>,
    /// Speaker label prefixed to user input submitted with `format_as_user`.
    pub user_speaker: String,
    /// Delay after a cancelled round settles before the next round starts.
    ///
    /// Backends may tear down asynchronously; starting too eagerly can race
    /// a still-draining request.
    pub grace_period_ms: u64,
    /// Retry limit for rounds whose output fails to parse (`None` = unbounded).
    pub max_malformed_retries: Option<u32>,
    /// Delay between malformed-output retries.
    pub malformed_retry_delay_ms: u64,
    /// Appended to successful code output in history.
    pub completion_marker: String,
    /// Appended to code failure descriptions in history.
    pub fault_marker: String,
    /// Capacity of the runtime event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            user_speaker: "User".to_owned(),
            grace_period_ms: 1_000,
            max_malformed_retries: None,
            malformed_retry_delay_ms: 0,
            completion_marker: "\n[completed]".to_owned(),
            fault_marker: "\n[faulted]".to_owned(),
            event_capacity: 64,
        }
    }
}

impl ConversationConfig {
    /// Grace period as a [`Duration`].
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Malformed-output retry delay as a [`Duration`].
    pub fn malformed_retry_delay(&self) -> Duration {
        Duration::from_millis(self.malformed_retry_delay_ms)
    }
}

/// OpenAI-compatible backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Server base URL (with or without a trailing `/v1`).
    pub base_url: String,
    /// Model identifier sent with each request.
    pub model: String,
    /// API key. Takes precedence over `api_key_env`.
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is unset.
    pub api_key_env: Option<String>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// TCP connect timeout.
    pub connect_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_owned(),
            model: "llama3.2".to_owned(),
            api_key: None,
            api_key_env: Some("OPENAI_API_KEY".to_owned()),
            temperature: 0.7,
            max_tokens: 1_024,
            connect_timeout_secs: 10,
        }
    }
}

impl BackendConfig {
    /// Resolve the API key from config or the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
    }
}

/// Code execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Whether code turns are executed at all.
    pub enabled: bool,
    /// Interpreter invoked as `<shell> -c <code>`.
    pub shell: String,
    /// Per-execution timeout.
    pub timeout_secs: u64,
    /// Output beyond this many bytes is truncated.
    pub max_output_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            shell: "/bin/sh".to_owned(),
            timeout_secs: 30,
            max_output_bytes: 16 * 1024,
        }
    }
}

/// One pronunciation rewrite applied before text is spoken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PronunciationRule {
    /// Literal text to find.
    pub pattern: String,
    /// Text the speech engine receives instead.
    pub replacement: String,
}

/// Speech text rewriting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// How patterns are compared against dialogue text.
    pub comparer: Comparer,
    /// Rewrites in precedence order.
    pub pronunciations: Vec<PronunciationRule>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        let rule = |pattern: &str, replacement: &str| PronunciationRule {
            pattern: pattern.to_owned(),
            replacement: replacement.to_owned(),
        };
        Self {
            comparer: Comparer::OrdinalIgnoreCase,
            pronunciations: vec![
                rule("Dr.", "Doctor"),
                rule("Mr.", "Mister"),
                rule("Mrs.", "Missus"),
                rule("&", "and"),
                rule("%", " percent"),
            ],
        }
    }
}

impl SpeechConfig {
    /// Build the pattern mapping described by this config.
    pub fn pattern_mapping(&self) -> PatternMapping {
        PatternMapping::from_pairs(
            self.comparer,
            self.pronunciations
                .iter()
                .map(|r| (r.pattern.clone(), r.replacement.clone())),
        )
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "colloquy=info".to_owned(),
        }
    }
}

impl ColloquyConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ConversationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ConversationError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/colloquy/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("colloquy")
            .join("config.toml")
    }

    /// Reject settings the runtime cannot honour.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            return Err(ConversationError::Config("backend.base_url is empty".into()));
        }
        if self.backend.model.trim().is_empty() {
            return Err(ConversationError::Config("backend.model is empty".into()));
        }
        if !self.backend.temperature.is_finite() || self.backend.temperature < 0.0 {
            return Err(ConversationError::Config(
                "backend.temperature must be a non-negative number".into(),
            ));
        }
        if self.execution.enabled && self.execution.shell.trim().is_empty() {
            return Err(ConversationError::Config(
                "execution.shell is empty while execution is enabled".into(),
            ));
        }
        if self.conversation.event_capacity == 0 {
            return Err(ConversationError::Config(
                "conversation.event_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}
