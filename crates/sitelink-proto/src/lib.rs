//! # sitelink-proto
//!
//! Wire protocol for the sitelink push channel: the frames a dashboard client
//! exchanges with the building server, and the device and activity records
//! carried inside topic payloads.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod frames;
pub mod types;

pub use error::ProtoError;
pub use frames::{ClientFrame, ServerFrame};
pub use types::{
    validate_topic, Activity, Device, SubscriptionId, ACTIVITY_TOPIC, DEVICES_TOPIC, MAX_TOPIC_LEN,
};
