//! Client configuration with validation.
//!
//! Values come from serde (any format; durations in humantime form such as
//! `"1s"` or `"250ms"`) or from `TDLINK_*` environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Longest wait a single request may ask for. Longer timeouts passed to
/// `submit` are clamped to this.
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Configuration shared by every handle a `ClientManager` opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Bounded wait passed to each engine `receive` call. Also bounds how
    /// long `close` waits for the receive loop to notice the stop request.
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,

    /// Deadline applied when a caller submits without one.
    #[serde(with = "humantime_serde")]
    pub default_request_timeout: Duration,

    /// Per-subscriber queue length before the oldest update is dropped.
    pub subscriber_queue_capacity: usize,

    /// Subscriptions allowed per handle.
    pub max_subscriptions: usize,

    /// How long timed-out or cancelled tokens are remembered so their late
    /// answers are discarded quietly.
    #[serde(with = "humantime_serde")]
    pub retired_token_ttl: Duration,

    /// Attempts made for a submission that fails transiently (1 = no retry).
    pub submit_attempts: u32,

    /// Upper bound for a graceful `shutdown` to observe engine closure.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            default_request_timeout: Duration::from_secs(30),
            subscriber_queue_capacity: 1024,
            max_subscriptions: 64,
            retired_token_ttl: Duration::from_secs(120),
            submit_attempts: 1,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Read overrides from `TDLINK_*` environment variables.
    ///
    /// - `TDLINK_POLL_TIMEOUT_MS`
    /// - `TDLINK_REQUEST_TIMEOUT_MS`
    /// - `TDLINK_SUBSCRIBER_QUEUE`
    /// - `TDLINK_MAX_SUBSCRIPTIONS`
    /// - `TDLINK_SUBMIT_ATTEMPTS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, "TDLINK_POLL_TIMEOUT_MS")? {
            config.poll_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "TDLINK_REQUEST_TIMEOUT_MS")? {
            config.default_request_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var(&lookup, "TDLINK_SUBSCRIBER_QUEUE")? {
            config.subscriber_queue_capacity = n;
        }
        if let Some(n) = parse_var(&lookup, "TDLINK_MAX_SUBSCRIPTIONS")? {
            config.max_subscriptions = n;
        }
        if let Some(n) = parse_var(&lookup, "TDLINK_SUBMIT_ATTEMPTS")? {
            config.submit_attempts = n;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "poll_timeout cannot be 0".into(),
            ));
        }

        if self.default_request_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "default_request_timeout cannot be 0".into(),
            ));
        }

        if self.poll_timeout > MAX_REQUEST_TIMEOUT {
            return Err(ConfigError::InvalidTimeout(format!(
                "poll_timeout cannot exceed {}s",
                MAX_REQUEST_TIMEOUT.as_secs()
            )));
        }

        if self.default_request_timeout > MAX_REQUEST_TIMEOUT {
            return Err(ConfigError::InvalidTimeout(format!(
                "default_request_timeout cannot exceed {}s",
                MAX_REQUEST_TIMEOUT.as_secs()
            )));
        }

        if self.shutdown_timeout > MAX_REQUEST_TIMEOUT {
            return Err(ConfigError::InvalidTimeout(format!(
                "shutdown_timeout cannot exceed {}s",
                MAX_REQUEST_TIMEOUT.as_secs()
            )));
        }

        if self.subscriber_queue_capacity == 0 {
            return Err(ConfigError::InvalidLimit(
                "subscriber_queue_capacity cannot be 0".into(),
            ));
        }

        if self.max_subscriptions == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_subscriptions cannot be 0".into(),
            ));
        }

        if self.submit_attempts == 0 {
            return Err(ConfigError::InvalidLimit(
                "submit_attempts must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("invalid limit: {0}")]
    InvalidLimit(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}
