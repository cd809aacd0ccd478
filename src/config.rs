//! Environment-derived configuration.

use std::fmt;
use std::path::PathBuf;

use crate::forwarder::engine::DEFAULT_POLL_INTERVAL_SECS;

/// Default path of the CSV log when `CSV_FILE` is not set.
const DEFAULT_CSV_FILE: &str = "messages.csv";

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// A required variable is absent or empty.
    Missing(&'static str),
    /// A variable is present but unusable.
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(name) => write!(f, "missing environment variable {}", name),
            Self::Invalid { name, value, reason } => {
                write!(f, "invalid value '{}' for {}: {}", value, name, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Runtime configuration, read once at startup and passed explicitly to
/// the engine and the sinks.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    /// Sheet webhook endpoint; required only for the sheet mode.
    pub webhook_url: Option<String>,
    /// Default source chats for the non-prompted modes.
    pub source_ids: Vec<i64>,
    /// Default destination channel for the configured forward mode.
    pub destination_id: Option<i64>,
    pub csv_file: PathBuf,
    pub poll_interval_secs: u64,
}

impl Config {
    /// Load from the process environment (after dotenvy has run).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup, so tests never touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup("TELEGRAM_BOT_TOKEN")
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;

        // Bot tokens are formatted as {bot_id}:{secret} with a numeric id.
        let parts: Vec<&str> = bot_token.split(':').collect();
        if parts.len() != 2 || parts[0].parse::<u64>().is_err() || parts[1].is_empty() {
            return Err(ConfigError::Invalid {
                name: "TELEGRAM_BOT_TOKEN",
                value: bot_token,
                reason: "expected format 123456789:ABCdefGHI...".to_string(),
            });
        }

        let webhook_url = lookup("WEBHOOK_URL").filter(|u| !u.is_empty());

        let source_ids = match lookup("SOURCE_IDS") {
            Some(raw) => parse_id_list("SOURCE_IDS", &raw)?,
            None => Vec::new(),
        };

        let destination_id = match lookup("DESTINATION_ID") {
            Some(raw) if !raw.trim().is_empty() => Some(parse_id("DESTINATION_ID", raw.trim())?),
            _ => None,
        };

        let csv_file = lookup("CSV_FILE")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CSV_FILE));

        let poll_interval_secs = match lookup("POLL_INTERVAL_SECS") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "POLL_INTERVAL_SECS",
                value: raw.clone(),
                reason: "expected a number of seconds".to_string(),
            })?,
            None => DEFAULT_POLL_INTERVAL_SECS,
        };

        Ok(Self {
            bot_token,
            webhook_url,
            source_ids,
            destination_id,
            csv_file,
            poll_interval_secs,
        })
    }
}

/// Parse a comma-separated list of chat ids, e.g. "-100123,-100456".
pub fn parse_id_list(name: &'static str, raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| parse_id(name, part))
        .collect()
}

fn parse_id(name: &'static str, raw: &str) -> Result<i64, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: "expected an integer chat id".to_string(),
    })
}
