//! Synchronization core configuration.

use std::time::Duration;

use crate::error::{SyncError, SyncResult};

/// Default delay between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default keepalive interval on the push channel.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for the connection manager and its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Fixed delay before every reconnection attempt.
    pub retry_delay: Duration,
    /// Keepalive ping interval (`None` disables pings).
    pub ping_interval: Option<Duration>,
    /// Capacity of the connection event broadcast channel.
    pub event_capacity: usize,
    /// Capacity of the inbound message queue between transport and registry.
    pub inbound_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            ping_interval: Some(DEFAULT_PING_INTERVAL),
            event_capacity: 256,
            inbound_capacity: 64,
        }
    }
}

impl SyncConfig {
    /// Set the reconnection delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the keepalive interval.
    #[must_use]
    pub const fn with_ping_interval(mut self, interval: Option<Duration>) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub const fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the inbound queue capacity.
    #[must_use]
    pub const fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a delay is zero or a capacity is zero.
    pub fn validate(&self) -> SyncResult<()> {
        if self.retry_delay.is_zero() {
            return Err(SyncError::Config("retry_delay cannot be zero".to_string()));
        }
        if self.ping_interval.is_some_and(|i| i.is_zero()) {
            return Err(SyncError::Config(
                "ping_interval cannot be zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(SyncError::Config(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        if self.inbound_capacity == 0 {
            return Err(SyncError::Config(
                "inbound_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
