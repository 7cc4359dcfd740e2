// Runtime configuration, read from the environment (and `.env` if present).

use chrono_tz::Tz;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub feed_url: String,
    pub feed_api_key: Option<String>,
    pub gtfs_source: Option<String>,
    pub reference_max_age_days: u64,
    pub request_timeout: Duration,
    pub timezone: Tz,
    pub static_dir: Option<PathBuf>,
}

impl TrackerConfig {
    const DEFAULT_BIND_ADDR: &'static str = "0.0.0.0";
    const DEFAULT_PORT: u16 = 8080;
    const DEFAULT_REFERENCE_MAX_AGE_DAYS: u64 = 15;
    const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset.
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let feed_url = get("TRACKER_FEED_URL").ok_or(ConfigError::Missing("TRACKER_FEED_URL"))?;

        let port = match get("TRACKER_PORT") {
            Some(value) => value
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid { key: "TRACKER_PORT", value })?,
            None => Self::DEFAULT_PORT,
        };

        let reference_max_age_days = match get("TRACKER_REFERENCE_MAX_AGE_DAYS") {
            Some(value) => value
                .parse::<u64>()
                .map_err(|_| ConfigError::Invalid { key: "TRACKER_REFERENCE_MAX_AGE_DAYS", value })?,
            None => Self::DEFAULT_REFERENCE_MAX_AGE_DAYS,
        };

        let timeout_secs = match get("TRACKER_REQUEST_TIMEOUT_SECS") {
            Some(value) => match value.parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => return Err(ConfigError::Invalid { key: "TRACKER_REQUEST_TIMEOUT_SECS", value }),
            },
            None => Self::DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        let timezone = match get("TRACKER_TIMEZONE") {
            Some(value) => value
                .parse::<Tz>()
                .map_err(|_| ConfigError::Invalid { key: "TRACKER_TIMEZONE", value })?,
            None => chrono_tz::UTC,
        };

        Ok(TrackerConfig {
            bind_addr: get("TRACKER_BIND_ADDR").unwrap_or_else(|| Self::DEFAULT_BIND_ADDR.to_string()),
            port,
            feed_url,
            feed_api_key: get("TRACKER_FEED_API_KEY"),
            gtfs_source: get("TRACKER_GTFS_SOURCE"),
            reference_max_age_days,
            request_timeout: Duration::from_secs(timeout_secs),
            timezone,
            static_dir: get("TRACKER_STATIC_DIR").map(PathBuf::from),
        })
    }
}
