//! Connection event types.

use std::time::Duration;

/// Events published by the connection manager.
///
/// This broadcast stream is the error observer of the synchronization core:
/// connection failures, malformed payloads and failing listeners are reported
/// here instead of being returned to whoever happened to trigger them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection attempt started.
    Connecting {
        /// Attempt number since the last successful connection (1-based).
        attempt: u32,
    },
    /// Link established; subscriptions are now accepted.
    Connected,
    /// Link lost or torn down. All subscription handles are now inert.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// Waiting before the next attempt.
    Retrying {
        /// Failed attempts so far.
        attempt: u32,
        /// Delay before next attempt.
        delay: Duration,
    },
    /// Connection attempt failed.
    Error(String),
    /// A message payload could not be parsed and was dropped.
    MalformedPayload {
        /// Topic the payload arrived on.
        topic: String,
        /// Parser message.
        error: String,
    },
    /// A listener failed while handling a message.
    ListenerFailed {
        /// Topic being delivered.
        topic: String,
        /// What the listener reported (or the panic message).
        error: String,
    },
}

impl ConnectionEvent {
    /// Whether this event should surface as a user-visible notification.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(
            self,
            Self::Error(_) | Self::MalformedPayload { .. } | Self::ListenerFailed { .. }
        )
    }
}
