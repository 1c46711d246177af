//! Frames exchanged over the push channel.
//!
//! Every frame is a JSON text message tagged by `type`. Topic payloads travel
//! as JSON-encoded text inside `message.body`, so the channel never needs to
//! understand what a topic carries.

use serde::{Deserialize, Serialize};

use crate::types::SubscriptionId;

/// Frames sent from the dashboard client to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Open an underlying subscription.
    Subscribe {
        /// Client-allocated subscription ID.
        id: SubscriptionId,
        /// Topic name.
        topic: String,
    },
    /// Close an underlying subscription.
    Unsubscribe {
        /// Subscription ID given in `Subscribe`.
        id: SubscriptionId,
    },
    /// Keepalive.
    Ping,
}

impl ClientFrame {
    /// Create a subscribe frame.
    #[must_use]
    pub fn subscribe(id: SubscriptionId, topic: impl Into<String>) -> Self {
        Self::Subscribe {
            id,
            topic: topic.into(),
        }
    }

    /// Create an unsubscribe frame.
    #[must_use]
    pub const fn unsubscribe(id: SubscriptionId) -> Self {
        Self::Unsubscribe { id }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, crate::ProtoError> {
        serde_json::to_string(self).map_err(|e| crate::ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid client frame.
    pub fn from_json(json: &str) -> Result<Self, crate::ProtoError> {
        serde_json::from_str(json).map_err(|e| crate::ProtoError::Decoding(e.to_string()))
    }
}

/// Frames sent from the server to the dashboard client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A message published on a subscribed topic.
    Message {
        /// Subscription the message belongs to.
        subscription: SubscriptionId,
        /// Topic the message was published on.
        topic: String,
        /// JSON-encoded payload text.
        body: String,
    },
    /// Server-side error (bad subscribe, permission denied...).
    Error {
        /// Human readable description.
        message: String,
    },
    /// Keepalive reply.
    Pong,
}

impl ServerFrame {
    /// Create a message frame.
    #[must_use]
    pub fn message(
        subscription: SubscriptionId,
        topic: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::Message {
            subscription,
            topic: topic.into(),
            body: body.into(),
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, crate::ProtoError> {
        serde_json::to_string(self).map_err(|e| crate::ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid server frame.
    pub fn from_json(json: &str) -> Result<Self, crate::ProtoError> {
        serde_json::from_str(json).map_err(|e| crate::ProtoError::Decoding(e.to_string()))
    }
}
