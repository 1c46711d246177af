//! Core types for the sitelink protocol.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtoError;

/// Topic carrying the full device collection.
pub const DEVICES_TOPIC: &str = "/devices";

/// Topic carrying the recent activity feed.
pub const ACTIVITY_TOPIC: &str = "/activities";

/// Maximum accepted topic length in bytes.
pub const MAX_TOPIC_LEN: usize = 256;

/// Identifier of one underlying subscription on the push channel.
///
/// Allocated by the client; the server echoes it back on every `message`
/// frame so the client can route the payload without parsing the topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Build the id for the `seq`-th subscription of a client.
    #[must_use]
    pub fn from_sequence(seq: u64) -> Self {
        Self(format!("sub-{seq}"))
    }

    /// Wrap an id received from the wire.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check that a topic name is acceptable on the wire.
///
/// # Errors
///
/// Returns an error if the topic is empty, does not start with `/`,
/// contains whitespace, or exceeds [`MAX_TOPIC_LEN`].
pub fn validate_topic(topic: &str) -> Result<(), ProtoError> {
    if topic.is_empty() {
        return Err(ProtoError::Validation("topic cannot be empty".to_string()));
    }
    if !topic.starts_with('/') {
        return Err(ProtoError::Validation(format!(
            "topic must start with '/': {topic}"
        )));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(ProtoError::Validation(format!(
            "topic exceeds {MAX_TOPIC_LEN} bytes"
        )));
    }
    if topic.chars().any(char::is_whitespace) {
        return Err(ProtoError::Validation(format!(
            "topic cannot contain whitespace: {topic:?}"
        )));
    }
    Ok(())
}

/// A building device as published on [`DEVICES_TOPIC`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Device ID.
    ///
    /// The server issues numeric ids. A list holding any non-numeric id does
    /// not decode as `Vec<Device>` and is rejected as a whole.
    pub id: u64,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Whether the device is switched on / online.
    #[serde(default)]
    pub status: bool,
    /// Device category (thermostat, lamp, sensor...).
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Room or zone the device is installed in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Fields this client does not model, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Device {
    /// Create a device with the given id and name.
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: false,
            kind: None,
            location: None,
            extra: Map::new(),
        }
    }

    /// Set the on/off status.
    #[must_use]
    pub fn with_status(mut self, status: bool) -> Self {
        self.status = status;
        self
    }

    /// Set the location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// One entry of the activity feed published on [`ACTIVITY_TOPIC`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Activity ID.
    pub id: u64,
    /// Device the activity refers to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u64>,
    /// User who triggered the activity, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// What happened.
    #[serde(default)]
    pub action: String,
    /// When it happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Fields this client does not model, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_subscription_id_from_sequence() {
        let id = SubscriptionId::from_sequence(7);
        assert_eq!(id.as_str(), "sub-7");
        assert_eq!(id.to_string(), "sub-7");
    }

    #[test]
    fn test_subscription_id_is_transparent() {
        let id = SubscriptionId::new("sub-3");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""sub-3""#);
    }

    #[test_case("/devices" ; "devices")]
    #[test_case("/activities" ; "activities")]
    #[test_case("/building/3/floor-2" ; "nested")]
    fn test_valid_topics(topic: &str) {
        assert!(validate_topic(topic).is_ok());
    }

    #[test_case("" ; "empty")]
    #[test_case("devices" ; "missing slash")]
    #[test_case("/dev ices" ; "whitespace")]
    fn test_invalid_topics(topic: &str) {
        assert!(matches!(validate_topic(topic), Err(ProtoError::Validation(_))));
    }

    #[test]
    fn test_topic_too_long() {
        let topic = format!("/{}", "a".repeat(MAX_TOPIC_LEN));
        assert!(validate_topic(&topic).is_err());
    }

    #[test]
    fn test_device_minimal_payload() {
        let devices: Vec<Device> = serde_json::from_str(r#"[{"id":1,"status":true}]"#).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, 1);
        assert!(devices[0].status);
        assert!(devices[0].name.is_empty());
        assert!(devices[0].extra.is_empty());
    }

    #[test]
    fn test_device_keeps_unknown_fields() {
        let json = r#"{"id":4,"name":"Lobby lamp","type":"lamp","brightness":80}"#;
        let device: Device = serde_json::from_str(json).unwrap();

        assert_eq!(device.kind.as_deref(), Some("lamp"));
        assert_eq!(device.extra.get("brightness"), Some(&Value::from(80)));

        let back = serde_json::to_value(&device).unwrap();
        assert_eq!(back["brightness"], 80);
        assert_eq!(back["type"], "lamp");
    }

    #[test]
    fn test_device_builder() {
        let device = Device::new(9, "Boiler").with_status(true).with_location("basement");
        assert_eq!(device.name, "Boiler");
        assert!(device.status);
        assert_eq!(device.location.as_deref(), Some("basement"));
    }

    #[test]
    fn test_activity_camel_case() {
        let json = r#"{"id":12,"deviceId":4,"user":"ops","action":"switched off","timestamp":"2024-05-01T10:00:00Z"}"#;
        let activity: Activity = serde_json::from_str(json).unwrap();

        assert_eq!(activity.device_id, Some(4));
        assert_eq!(activity.user.as_deref(), Some("ops"));
        assert!(activity.timestamp.is_some());
    }

    #[test]
    fn test_device_rejects_missing_id() {
        let result = serde_json::from_str::<Device>(r#"{"name":"ghost"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_device_list_with_string_id_is_rejected() {
        let json = r#"[{"id":1,"name":"Lobby"},{"id":"hvac-2","name":"Roof"}]"#;
        let err = serde_json::from_str::<Vec<Device>>(json).unwrap_err();
        assert!(err.to_string().contains("invalid type: string"));
    }

    proptest::proptest! {
        #[test]
        fn prop_topics_with_whitespace_are_rejected(prefix in "[a-z]{0,8}", suffix in "[a-z]{0,8}") {
            let topic = format!("/{prefix} {suffix}");
            proptest::prop_assert!(validate_topic(&topic).is_err());
        }

        #[test]
        fn prop_slash_prefixed_words_are_accepted(segments in proptest::collection::vec("[a-z0-9-]{1,12}", 1..5)) {
            let topic = format!("/{}", segments.join("/"));
            proptest::prop_assert!(validate_topic(&topic).is_ok());
        }
    }
}
