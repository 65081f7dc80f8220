//! Chatbot configuration.
//!
//! The collaborator layer (gateway, console wiring) owns how configuration is
//! sourced; the core only needs the resolved struct. `ChatBotConfig::from_env`
//! is a convenience for collaborators that configure through the environment,
//! loading `.env` via `dotenvy` first.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// The Horde's documented anonymous API key.
pub const ANONYMOUS_API_KEY: &str = "0000000000";

/// Default public Horde endpoint.
pub const DEFAULT_BASE_URL: &str = "https://koboldai.net/api/v2";

/// Init-time configuration for a [`crate::ChatBot`].
#[derive(Debug, Clone)]
pub struct ChatBotConfig {
    /// The bot's display name; also the speaker prefix stripped from output.
    pub name: String,
    /// Persona text rendered at the top of every prompt.
    pub persona: Option<String>,
    /// Canned greeting rendered as the bot's first turn.
    pub hello: Option<String>,
    /// Horde API key. Defaults to the anonymous key.
    pub api_key: SecretString,
    /// Horde endpoint base URL.
    pub base_url: String,
    /// Entries older than this are evicted before each prompt build.
    pub memory_time_limit: Duration,
    /// At most this many entries survive eviction (most recent kept).
    pub memory_space_limit: usize,
    /// Models the Horde may route the job to. Empty means any.
    pub allowed_models: Vec<String>,
    /// When set, only `force`d messages trigger generation; the rest are
    /// remembered silently.
    pub mention_only: bool,
}

impl ChatBotConfig {
    /// Minimal config with the original's defaults: anonymous key, ten-minute
    /// memory window, unbounded size, any model.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persona: None,
            hello: None,
            api_key: SecretString::from(ANONYMOUS_API_KEY.to_string()),
            base_url: DEFAULT_BASE_URL.to_string(),
            memory_time_limit: Duration::from_secs(10 * 60),
            memory_space_limit: usize::MAX,
            allowed_models: Vec::new(),
            mention_only: false,
        }
    }

    /// Resolve configuration from the environment (loading `.env` first).
    ///
    /// Recognized variables: `CHATBOT_NAME` (required), `CHATBOT_PERSONA`,
    /// `CHATBOT_HELLO`, `HORDE_API_KEY`, `HORDE_BASE_URL`, `HORDE_MODELS`
    /// (comma-separated), `MEMORY_TIME_LIMIT` (minutes, fractional allowed),
    /// `MEMORY_SPACE_LIMIT`, `MENTION_ONLY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let name = optional_env("CHATBOT_NAME")?.ok_or_else(|| ConfigError::MissingRequired {
            key: "CHATBOT_NAME".to_string(),
            hint: "Set CHATBOT_NAME to the bot's display name".to_string(),
        })?;

        let mut config = Self::new(name);
        config.persona = optional_env("CHATBOT_PERSONA")?;
        config.hello = optional_env("CHATBOT_HELLO")?;
        if let Some(key) = optional_env("HORDE_API_KEY")? {
            config.api_key = SecretString::from(key);
        }
        if let Some(url) = optional_env("HORDE_BASE_URL")? {
            config.base_url = url;
        }
        if let Some(models) = optional_env("HORDE_MODELS")? {
            config.allowed_models = models
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
        }

        let minutes: f64 = parse_optional_env("MEMORY_TIME_LIMIT", 10.0)?;
        if !minutes.is_finite() || minutes < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "MEMORY_TIME_LIMIT".to_string(),
                message: "must be a non-negative number of minutes".to_string(),
            });
        }
        config.memory_time_limit = Duration::from_secs_f64(minutes * 60.0);
        config.memory_space_limit = parse_optional_env("MEMORY_SPACE_LIMIT", usize::MAX)?;
        config.mention_only = parse_optional_env("MENTION_ONLY", false)?;

        Ok(config)
    }
}

pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::ReadError(format!("failed to read {key}: {e}"))),
    }
}

pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
        .map(|opt| opt.unwrap_or(default))
}
