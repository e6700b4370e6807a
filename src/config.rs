//! Process configuration
//!
//! Read once at startup from the environment (after an optional `.env`
//! file). Validation returns a typed error; `main` decides how to exit.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_DATA_PATH: &str = "data.json";
const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("AUTH_TOKEN missing (legacy name BOT_TOKEN is also accepted)")]
    MissingToken,
    #[error("{name} must be a whole number of seconds, got {value:?}")]
    InvalidDuration { name: &'static str, value: String },
}

/// Runtime configuration
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub auth_token: String,
    /// Delete replies once they have been absorbed into the scroll
    pub auto_delete_replies: bool,
    pub data_path: PathBuf,
    pub api_base: String,
    pub poll_timeout: Duration,
}

// Hand-written so the token never reaches logs
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("auth_token", &"<redacted>")
            .field("auto_delete_replies", &self.auto_delete_replies)
            .field("data_path", &self.data_path)
            .field("api_base", &self.api_base)
            .field("poll_timeout", &self.poll_timeout)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let first_of = |names: &[&str]| names.iter().find_map(|name| lookup(name));

        let auth_token = first_of(&["AUTH_TOKEN", "BOT_TOKEN"])
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let auto_delete_replies = first_of(&["AUTO_DELETE_REPLIES", "DELETE_REPLIES"])
            .map_or(true, |v| parse_flag(&v));

        let poll_timeout = match lookup("POLL_TIMEOUT_SECS") {
            Some(value) => value
                .trim()
                .parse()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::InvalidDuration {
                    name: "POLL_TIMEOUT_SECS",
                    value,
                })?,
            None => Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS),
        };

        Ok(Self {
            auth_token,
            auto_delete_replies,
            data_path: lookup("SCROLL_DATA_PATH")
                .map_or_else(|| PathBuf::from(DEFAULT_DATA_PATH), PathBuf::from),
            api_base: lookup("TELEGRAM_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            poll_timeout,
        })
    }
}

/// `true`, `1` and `yes` (any case) are on; anything else is off
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}
