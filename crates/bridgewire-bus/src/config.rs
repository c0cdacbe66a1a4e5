//! Endpoint configuration with validation.

use bridgewire_types::{BridgeError, CONTROL_MARKER};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default token alphabet: `a-z`, `A-Z`, `0-9`.
pub const DEFAULT_ALPHABET: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    #[error("Invalid alphabet: {0}")]
    InvalidAlphabet(String),

    #[error("Invalid environment variable {name}: {reason}")]
    InvalidEnv { name: &'static str, reason: String },
}

impl From<ConfigError> for BridgeError {
    fn from(err: ConfigError) -> Self {
        BridgeError::Config(err.to_string())
    }
}

/// Endpoint configuration, shared by hub and peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How long a peer waits for the hub to supply a mapping before
    /// falling back to the uncompressed name.
    #[serde(with = "humantime_serde")]
    pub resolve_timeout: Duration,

    /// Default window for per-bridge rate limits.
    #[serde(with = "humantime_serde")]
    pub rate_limit_window: Duration,

    /// Hub only: messages one sender may send across all channels per window.
    pub volume_ceiling: u32,

    /// Hub only: window for the global volume ceiling.
    #[serde(with = "humantime_serde")]
    pub volume_window: Duration,

    /// Characters used to build tokens.
    pub alphabet: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(1),
            rate_limit_window: Duration::from_secs(1),
            volume_ceiling: 600,
            volume_window: Duration::from_secs(1),
            alphabet: DEFAULT_ALPHABET.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolve_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "resolve_timeout cannot be 0".into(),
            ));
        }

        if self.rate_limit_window.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "rate_limit_window cannot be 0".into(),
            ));
        }

        if self.volume_window.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "volume_window cannot be 0".into(),
            ));
        }

        if self.volume_ceiling == 0 {
            return Err(ConfigError::InvalidLimit("volume_ceiling cannot be 0".into()));
        }

        let mut seen = HashSet::new();
        for c in self.alphabet.chars() {
            if c == CONTROL_MARKER {
                return Err(ConfigError::InvalidAlphabet(format!(
                    "{CONTROL_MARKER:?} is reserved for control tokens"
                )));
            }
            if !seen.insert(c) {
                return Err(ConfigError::InvalidAlphabet(format!(
                    "duplicate character {c:?}"
                )));
            }
        }
        if seen.len() < 2 {
            return Err(ConfigError::InvalidAlphabet(
                "at least two characters are required".into(),
            ));
        }

        Ok(())
    }

    /// Defaults overlaid with environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BRIDGEWIRE_RESOLVE_TIMEOUT`: e.g. `1s`, `250ms`
    /// - `BRIDGEWIRE_RATE_LIMIT_WINDOW`: e.g. `1s`
    /// - `BRIDGEWIRE_VOLUME_CEILING`: messages per volume window
    /// - `BRIDGEWIRE_VOLUME_WINDOW`: e.g. `1s`
    /// - `BRIDGEWIRE_ALPHABET`: token characters
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(timeout) = env_duration("BRIDGEWIRE_RESOLVE_TIMEOUT")? {
            config.resolve_timeout = timeout;
        }
        if let Some(window) = env_duration("BRIDGEWIRE_RATE_LIMIT_WINDOW")? {
            config.rate_limit_window = window;
        }
        if let Some(window) = env_duration("BRIDGEWIRE_VOLUME_WINDOW")? {
            config.volume_window = window;
        }
        if let Ok(raw) = env::var("BRIDGEWIRE_VOLUME_CEILING") {
            config.volume_ceiling = raw.parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidEnv {
                    name: "BRIDGEWIRE_VOLUME_CEILING",
                    reason: e.to_string(),
                }
            })?;
        }
        if let Ok(alphabet) = env::var("BRIDGEWIRE_ALPHABET") {
            config.alphabet = alphabet;
        }

        config.validate()?;
        Ok(config)
    }
}

fn env_duration(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(name) {
        Ok(raw) => humantime::parse_duration(&raw)
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                name,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
