//! Plain-text rendering of live collections and connection events.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use sitelink_proto::{Activity, Device};
use sitelink_sync::{CollectionState, ConnectionEvent, Origin};

/// Summary line of a collection: count, origin and freshness.
pub fn header<T>(label: &str, state: &CollectionState<T>) -> String {
    if let Some(error) = &state.seed_error {
        if state.items.is_none() {
            return format!("{label}: unavailable ({error})");
        }
    }
    let Some(items) = &state.items else {
        return format!("{label}: loading...");
    };
    let origin = match state.origin {
        Origin::Empty => "empty",
        Origin::Seed => "initial fetch",
        Origin::Push => "live",
    };
    let refreshed = state
        .last_refreshed
        .map_or_else(String::new, |at| format!(", updated {}", at.format("%H:%M:%S")));
    format!("{label}: {} ({origin}{refreshed})", items.len())
}

/// One line per device.
pub fn device_line(device: &Device) -> String {
    let status = if device.status { "on " } else { "off" };
    let mut line = format!("  [{status}] #{:<5} {}", device.id, device.name);
    if let Some(kind) = &device.kind {
        let _ = write!(line, " <{kind}>");
    }
    if let Some(location) = &device.location {
        let _ = write!(line, " @ {location}");
    }
    line
}

/// One line per activity entry.
pub fn activity_line(activity: &Activity) -> String {
    let when = activity
        .timestamp
        .as_ref()
        .map_or_else(|| "--:--:--".to_string(), |at: &DateTime<Utc>| at.format("%H:%M:%S").to_string());
    let mut line = format!("  {when} {}", activity.action);
    if let Some(user) = &activity.user {
        let _ = write!(line, " by {user}");
    }
    if let Some(device) = activity.device_id {
        let _ = write!(line, " (device #{device})");
    }
    line
}

/// Full block for a device list.
pub fn devices(state: &CollectionState<Device>) -> String {
    block("devices", state, device_line)
}

/// Full block for an activity feed.
pub fn activities(state: &CollectionState<Activity>) -> String {
    block("activities", state, activity_line)
}

fn block<T>(label: &str, state: &CollectionState<T>, line: impl Fn(&T) -> String) -> String {
    let mut out = header(label, state);
    for item in state.items() {
        out.push('\n');
        out.push_str(&line(item));
    }
    out
}

/// Text for a connection event worth showing, if any.
pub fn event(event: &ConnectionEvent) -> Option<String> {
    match event {
        ConnectionEvent::Connected => Some("* connected".to_string()),
        ConnectionEvent::Disconnected { reason } => Some(format!("* disconnected: {reason}")),
        ConnectionEvent::Retrying { attempt, delay } => Some(format!(
            "* retrying in {}s (failed attempts: {attempt})",
            delay.as_secs()
        )),
        ConnectionEvent::Error(message) => Some(format!("! {message}")),
        ConnectionEvent::MalformedPayload { topic, error } => {
            Some(format!("! dropped malformed payload on {topic}: {error}"))
        }
        ConnectionEvent::ListenerFailed { topic, error } => {
            Some(format!("! consumer of {topic} failed: {error}"))
        }
        ConnectionEvent::Connecting { .. } => None,
    }
}
