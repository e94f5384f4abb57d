//! Configuration management for the broker.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default inclusive verification code range.
pub const DEFAULT_CODE_RANGE: (u32, u32) = (0, 9999);

/// Default upper bound on a remote delivery before the local caller is answered anyway.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;

/// Default Telegram Bot API endpoint.
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Default long-poll timeout for inbound commands.
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;

/// Main broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Telegram bot credential. Only ever read, never written back to disk.
    #[serde(default, skip_serializing)]
    pub bot_token: Option<String>,
    /// Usernames allowed to bind their chat with `/start`.
    #[serde(default)]
    pub trusted_users: BTreeSet<String>,
    /// Listener socket path; defaults to `Paths::socket_file()`.
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    /// Inclusive `[lo, hi]` range verification codes are drawn from.
    #[serde(default = "default_code_range")]
    pub code_range: (u32, u32),
    /// Upper bound on one remote delivery, in milliseconds.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Telegram Bot API base URL.
    #[serde(default = "default_telegram_api_url")]
    pub telegram_api_url: String,
    /// Long-poll timeout for `getUpdates`, in seconds.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_code_range() -> (u32, u32) {
    DEFAULT_CODE_RANGE
}

fn default_send_timeout_ms() -> u64 {
    DEFAULT_SEND_TIMEOUT_MS
}

fn default_telegram_api_url() -> String {
    DEFAULT_TELEGRAM_API_URL.to_string()
}

fn default_poll_timeout_secs() -> u64 {
    DEFAULT_POLL_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            bot_token: None,
            trusted_users: BTreeSet::new(),
            socket_path: None,
            code_range: DEFAULT_CODE_RANGE,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            telegram_api_url: default_telegram_api_url(),
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load `config.json` from the base directory, falling back to defaults.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        Self::load_from(&paths.config_file())
    }

    /// Load configuration from `path` if it exists, then apply environment overrides.
    pub fn load_from(path: &Path) -> CoreResult<Self> {
        let mut config = if path.exists() {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };
        config.load_from_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    fn load_from_env(&mut self) {
        self.apply_env(|name| std::env::var(name).ok());
    }

    /// Override fields from environment-style lookups.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).and_then(non_empty_value);

        if let Some(level) = non_empty("TELEVERY_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(token) =
            non_empty("TELEVERY_BOT_TOKEN").or_else(|| non_empty("TELEGRAM_BOT_TOKEN"))
        {
            self.bot_token = Some(token);
        }
        if let Some(users) = non_empty("TELEVERY_TRUSTED_USERS") {
            self.trusted_users = users
                .split(',')
                .filter_map(|user| non_empty_value(user.to_string()))
                .collect();
        }
        if let Some(socket) = non_empty("TELEVERY_SOCKET") {
            self.socket_path = Some(PathBuf::from(socket));
        }
    }

    /// Check everything the broker needs before it binds anything.
    pub fn validate(&self) -> CoreResult<()> {
        self.bot_token()?;
        let (lo, hi) = self.code_range;
        if lo > hi {
            return Err(CoreError::Config(format!(
                "code_range lower bound {} exceeds upper bound {}",
                lo, hi
            )));
        }
        if self.send_timeout_ms == 0 {
            return Err(CoreError::Config(
                "send_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.telegram_api_url()?;
        Ok(())
    }

    /// Get the bot token, or a configuration error if none was provided.
    pub fn bot_token(&self) -> CoreResult<&str> {
        self.bot_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                CoreError::Config(
                    "bot token missing; set TELEVERY_BOT_TOKEN or bot_token in config.json"
                        .to_string(),
                )
            })
    }

    /// Resolve the listener socket path.
    pub fn socket_path(&self, paths: &Paths) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| paths.socket_file())
    }

    /// Remote delivery timeout.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Long-poll timeout for inbound commands.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    /// Get the Telegram API base URL as a parsed URL.
    pub fn telegram_api_url(&self) -> CoreResult<Url> {
        Url::parse(&self.telegram_api_url).map_err(CoreError::from)
    }
}

fn non_empty_value(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
