//! Watcher configuration.
//!
//! Read from a JSON file; command-line flags override individual values.

use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sitelink_sync::SyncConfig;

use crate::error::{WatchError, WatchResult};

/// A live collection the watcher can follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Feed {
    /// Device list.
    Devices,
    /// Activity feed.
    Activities,
}

fn default_feeds() -> Vec<Feed> {
    vec![Feed::Devices, Feed::Activities]
}

const fn default_retry_delay_secs() -> u64 {
    5
}

const fn default_ping_interval_secs() -> u64 {
    30
}

/// Watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchConfig {
    /// Push server WebSocket URL.
    pub server_url: String,
    /// REST API base URL used for the initial fetch.
    pub api_url: String,
    /// Feeds to follow.
    #[serde(default = "default_feeds")]
    pub feeds: Vec<Feed>,
    /// Seconds between reconnection attempts.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Keepalive interval in seconds (0 disables pings).
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8080/push".to_string(),
            api_url: "http://localhost:8080/api".to_string(),
            feeds: default_feeds(),
            retry_delay_secs: default_retry_delay_secs(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

impl WatchConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> WatchResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            WatchError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> WatchResult<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| WatchError::Config(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> WatchResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| WatchError::Config(e.to_string()))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is invalid.
    pub fn validate(&self) -> WatchResult<()> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(WatchError::Config(format!(
                "server_url must be a ws:// or wss:// URL, got '{}'",
                self.server_url
            )));
        }
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(WatchError::Config(format!(
                "api_url must be an http:// or https:// URL, got '{}'",
                self.api_url
            )));
        }
        if self.feeds.is_empty() {
            return Err(WatchError::Config("at least one feed is required".to_string()));
        }
        if self.retry_delay_secs == 0 {
            return Err(WatchError::Config("retry_delay_secs cannot be zero".to_string()));
        }
        Ok(())
    }

    /// Synchronization core settings derived from this configuration.
    #[must_use]
    pub fn sync_config(&self) -> SyncConfig {
        let ping = (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs));
        SyncConfig::default()
            .with_retry_delay(Duration::from_secs(self.retry_delay_secs))
            .with_ping_interval(ping)
    }
}
