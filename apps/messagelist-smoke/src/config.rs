//! Environment-backed runtime configuration for `messagelist-smoke`.

use std::{env, error::Error, fmt, time::Duration};

use messagelist_core::{DraftConfig, StoreConfig};

const DEFAULT_MESSAGE_COUNT: usize = 120;
const DEFAULT_ACCOUNT_ID: u32 = 1;
const DEFAULT_CHAT_ID: u32 = 10;

/// Runtime configuration used by the smoke binary.
#[derive(Debug, Clone, PartialEq)]
pub struct SmokeConfig {
    /// Account the seeded chat belongs to.
    pub account_id: u32,
    /// Chat that is seeded and opened.
    pub chat_id: u32,
    /// Number of messages seeded into the chat.
    pub message_count: usize,
    /// Store tuning forwarded to `MessageListStore::with_config`.
    pub store: StoreConfig,
    /// Draft tuning forwarded to `DraftController::new`.
    pub draft: DraftConfig,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let account_id = parse_or("MESSAGELIST_ACCOUNT_ID", DEFAULT_ACCOUNT_ID, &mut lookup)?;
        let chat_id = parse_or("MESSAGELIST_CHAT_ID", DEFAULT_CHAT_ID, &mut lookup)?;
        let message_count =
            parse_or("MESSAGELIST_SMOKE_MESSAGES", DEFAULT_MESSAGE_COUNT, &mut lookup)?;

        let defaults = StoreConfig::default();
        let page_size = parse_or("MESSAGELIST_PAGE_SIZE", defaults.page_size, &mut lookup)?;
        let load_more_threshold_px = parse_or(
            "MESSAGELIST_LOAD_MORE_THRESHOLD_PX",
            defaults.load_more_threshold_px,
            &mut lookup,
        )?;
        let missing_messages_debounce = parse_millis_or(
            "MESSAGELIST_MISSING_DEBOUNCE_MS",
            defaults.missing_messages_debounce,
            &mut lookup,
        )?;
        let save_debounce = parse_millis_or(
            "MESSAGELIST_DRAFT_DEBOUNCE_MS",
            DraftConfig::default().save_debounce,
            &mut lookup,
        )?;

        if chat_id == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MESSAGELIST_CHAT_ID",
                value: "0".to_owned(),
                reason: "0 is reserved for \"any chat\"".to_owned(),
            });
        }
        if page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MESSAGELIST_PAGE_SIZE",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if load_more_threshold_px <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "MESSAGELIST_LOAD_MORE_THRESHOLD_PX",
                value: load_more_threshold_px.to_string(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        Ok(Self {
            account_id,
            chat_id,
            message_count,
            store: StoreConfig {
                page_size,
                load_more_threshold_px,
                missing_messages_debounce,
                ..defaults
            },
            draft: DraftConfig { save_debounce },
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn parse_or<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key).filter(|value| !value.trim().is_empty()) else {
        return Ok(default);
    };
    value
        .trim()
        .parse::<T>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_millis_or<F>(
    key: &'static str,
    default: Duration,
    lookup: &mut F,
) -> Result<Duration, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let millis = parse_or::<u64, _>(key, 0, lookup)?;
    if millis == 0 {
        return Ok(default);
    }
    Ok(Duration::from_millis(millis))
}
