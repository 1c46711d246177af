//! Error types for sitelink-sync.

use sitelink_proto::ProtoError;
use thiserror::Error;

/// Result type alias for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while keeping live data in sync.
///
/// Cloneable so it can travel inside broadcast [`ConnectionEvent`]s.
///
/// [`ConnectionEvent`]: crate::channel::ConnectionEvent
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// A subscribe was issued while the push channel is not connected.
    #[error("push channel is not connected")]
    NotConnected,

    /// The credential is malformed (empty, whitespace...).
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// The server rejected the credential.
    #[error("credential rejected by server")]
    Unauthorized,

    /// Transport-level failure (DNS, TCP, TLS, handshake).
    #[error("transport error: {0}")]
    Transport(String),

    /// The link was closed before the operation could be sent.
    #[error("link closed")]
    LinkClosed,

    /// Topic name rejected.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// HTTP request returned a non-success status.
    #[error("http error {status}: {message}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// A payload did not match the expected shape.
    #[error("malformed payload on {topic}: {message}")]
    MalformedPayload {
        /// Topic the payload arrived on.
        topic: String,
        /// Parser message.
        message: String,
    },

    /// Protocol encoding/decoding error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<ProtoError> for SyncError {
    fn from(err: ProtoError) -> Self {
        match err {
            ProtoError::Validation(msg) => Self::InvalidTopic(msg),
            other => Self::Protocol(other.to_string()),
        }
    }
}

/// Error returned by a topic listener.
///
/// Returned errors are isolated per listener: they are logged and reported,
/// and delivery continues with the next listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The payload could not be decoded into the listener's type.
    #[error("payload does not match expected shape: {0}")]
    Decode(String),

    /// The listener refused the payload for its own reasons.
    #[error("{0}")]
    Rejected(String),
}
