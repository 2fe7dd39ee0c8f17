//! Tracker configuration, loaded from TOML.
//!
//! ```toml
//! converse_window_mins = 5
//! query_timeout_secs = 5
//! lang = "en-us"
//! sync_interval_secs = 0
//! ```

use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default converse window, in minutes.
pub const DEFAULT_CONVERSE_WINDOW_MINS: u64 = 5;

/// Default timeout for intent-service queries, in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 5;

pub const DEFAULT_LANG: &str = "en-us";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {detail}")]
    Invalid { field: &'static str, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    /// Idle time, in minutes, after which a handler stops being eligible
    /// to converse.
    pub converse_window_mins: u64,
    /// Bound on every intent-service query, in seconds.
    pub query_timeout_secs: u64,
    /// Language tag sent with utterance queries.
    pub lang: String,
    /// Period of the background reconciliation sweep. 0 disables it.
    pub sync_interval_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            converse_window_mins: DEFAULT_CONVERSE_WINDOW_MINS,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
            lang: DEFAULT_LANG.to_owned(),
            sync_interval_secs: 0,
        }
    }
}

impl TrackerConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "query_timeout_secs",
                detail: "must be at least 1".to_owned(),
            });
        }
        if i64::try_from(self.converse_window_mins)
            .ok()
            .and_then(TimeDelta::try_minutes)
            .is_none()
        {
            return Err(ConfigError::Invalid {
                field: "converse_window_mins",
                detail: format!("{} is out of range", self.converse_window_mins),
            });
        }
        if self.lang.is_empty() {
            return Err(ConfigError::Invalid {
                field: "lang",
                detail: "must not be empty".to_owned(),
            });
        }
        Ok(())
    }

    pub fn converse_window(&self) -> TimeDelta {
        i64::try_from(self.converse_window_mins)
            .ok()
            .and_then(TimeDelta::try_minutes)
            .unwrap_or(TimeDelta::MAX)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// `None` when background reconciliation is disabled.
    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync_interval_secs > 0).then(|| Duration::from_secs(self.sync_interval_secs))
    }
}
