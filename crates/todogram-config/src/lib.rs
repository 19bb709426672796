//! Todogram Configuration
//!
//! TOML configuration loading with environment variable support

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const TOKEN_ENV: &str = "TODOGRAM_BOT_TOKEN";
pub const DB_PATH_ENV: &str = "TODOGRAM_DB_PATH";

const TOKEN_PLACEHOLDER: &str = "YOUR_BOT_TOKEN_HERE";
const DEFAULT_DB_FILE: &str = "todo.sqlite";
const MAX_LONG_POLL_SECS: u64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing bot token: set telegram.bot_token or {}", TOKEN_ENV)]
    MissingCredential,

    #[error("Invalid bot token: {0}")]
    InvalidCredential(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    pub data_dir: Option<String>,
    /// Relative paths resolve against `data_dir`.
    pub db_path: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Long-poll window passed to getUpdates; 0 means short polling.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Defaults to the long-poll window plus a 10 second margin.
    pub fetch_timeout_secs: Option<u64>,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default)]
    pub persist_cursor: bool,
    #[serde(default)]
    pub allowed_chats: Option<Vec<i64>>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            poll_timeout_secs: default_poll_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            fetch_timeout_secs: None,
            send_timeout_secs: default_send_timeout_secs(),
            persist_cursor: false,
            allowed_chats: None,
        }
    }
}

impl TelegramConfig {
    pub fn fetch_timeout_secs(&self) -> u64 {
        self.fetch_timeout_secs
            .unwrap_or(self.poll_timeout_secs + 10)
    }

    /// Numeric bot id, the part of the token before `:`.
    pub fn account_tag(&self) -> String {
        self.bot_token
            .split(':')
            .next()
            .filter(|id| !id.is_empty())
            .unwrap_or("default")
            .to_string()
    }
}

fn default_poll_timeout_secs() -> u64 {
    25
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_send_timeout_secs() -> u64 {
    15
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::read(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if given, otherwise the default file if present, otherwise
    /// builds a config from the environment alone.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = Self::read_resolved(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::resolve`] without the bot token check, for commands
    /// that only touch the local database.
    pub fn resolve_offline(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = Self::read_resolved(path)?;
        config.validate_settings()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn read_resolved(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::read(path);
        }
        if let Some(default_path) = Self::default_path().filter(|p| p.exists()) {
            return Self::read(&default_path);
        }

        let mut config = Config::default();
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("todogram").join("config.toml"))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(TOKEN_ENV).filter(|v| !v.trim().is_empty()) {
            self.telegram.bot_token = token.trim().to_string();
        }
        if let Some(db_path) = lookup(DB_PATH_ENV).filter(|v| !v.trim().is_empty()) {
            self.core.db_path = Some(db_path.trim().to_string());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_token(&self.telegram.bot_token)?;
        self.validate_settings()
    }

    /// Everything except the bot token.
    pub fn validate_settings(&self) -> Result<(), ConfigError> {
        let telegram = &self.telegram;
        if telegram.poll_timeout_secs > MAX_LONG_POLL_SECS {
            return Err(ConfigError::InvalidValue {
                key: "telegram.poll_timeout_secs".to_string(),
                message: format!("must be <= {}", MAX_LONG_POLL_SECS),
            });
        }
        if telegram.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "telegram.poll_interval_ms".to_string(),
                message: "must be > 0".to_string(),
            });
        }
        if telegram.send_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "telegram.send_timeout_secs".to_string(),
                message: "must be > 0".to_string(),
            });
        }
        if telegram.fetch_timeout_secs() <= telegram.poll_timeout_secs {
            return Err(ConfigError::InvalidValue {
                key: "telegram.fetch_timeout_secs".to_string(),
                message: "must exceed telegram.poll_timeout_secs".to_string(),
            });
        }

        if let Some(db_path) = &self.core.db_path {
            if db_path.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "core.db_path".to_string(),
                    message: "cannot be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        match &self.core.data_dir {
            Some(data_dir) => expand_home(data_dir),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".todogram"),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        match &self.core.db_path {
            Some(db_path) => {
                let path = expand_home(db_path);
                if path.is_absolute() {
                    path
                } else {
                    self.data_dir().join(path)
                }
            }
            None => self.data_dir().join(DEFAULT_DB_FILE),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        if path == "~" {
            home
        } else {
            home.join(path.trim_start_matches("~/"))
        }
    } else {
        PathBuf::from(path)
    }
}

/// Telegram tokens look like `123456789:AAE...`.
fn validate_token(token: &str) -> Result<(), ConfigError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ConfigError::MissingCredential);
    }
    if token == TOKEN_PLACEHOLDER {
        return Err(ConfigError::InvalidCredential(
            "placeholder token, replace it with the one from @BotFather".to_string(),
        ));
    }

    let Some((bot_id, secret)) = token.split_once(':') else {
        return Err(ConfigError::InvalidCredential(
            "expected <bot_id>:<secret>".to_string(),
        ));
    };
    if bot_id.is_empty() || !bot_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::InvalidCredential(
            "bot id must be numeric".to_string(),
        ));
    }
    if secret.is_empty() || secret.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidCredential(
            "secret part is empty or contains whitespace".to_string(),
        ));
    }

    Ok(())
}
