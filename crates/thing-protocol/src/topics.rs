//! MQTT topic builders and parsers for the device topic hierarchy.
//!
//! Topic structure:
//! ```text
//! /devices/{device_id}/config              broker -> device (subscribe)
//! /devices/{device_id}/state               device -> broker
//! /devices/{device_id}/events              device -> broker
//! /devices/{device_id}/events/{seg}/...    device -> broker (sub-folders)
//! ```

use serde::{Deserialize, Serialize};

const PREFIX: &str = "/devices";

/// Logical message category of a device topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Configuration pushed by the cloud.
    Config,
    /// Device state reported to the cloud.
    State,
    /// Telemetry events, optionally nested in sub-folders.
    Events,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::State => "state",
            Self::Events => "events",
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "config" => Some(Self::Config),
            "state" => Some(Self::State),
            "events" => Some(Self::Events),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the topic for `channel`, appending `segments` for events.
///
/// Only [`ChannelKind::Events`] takes sub-folder segments; passing segments
/// for config or state is a programming error.
pub fn topic<S: AsRef<str>>(device_id: &str, channel: ChannelKind, segments: &[S]) -> String {
    debug_assert!(
        channel == ChannelKind::Events || segments.is_empty(),
        "only the events channel takes sub-folder segments"
    );

    let mut topic = format!("{PREFIX}/{device_id}/{channel}");
    if channel == ChannelKind::Events {
        for segment in segments {
            topic.push('/');
            topic.push_str(segment.as_ref());
        }
    }
    topic
}

// ─── Per-channel helpers ───

pub fn config(device_id: &str) -> String {
    topic::<&str>(device_id, ChannelKind::Config, &[])
}

pub fn state(device_id: &str) -> String {
    topic::<&str>(device_id, ChannelKind::State, &[])
}

pub fn events<S: AsRef<str>>(device_id: &str, segments: &[S]) -> String {
    topic(device_id, ChannelKind::Events, segments)
}

// ─── Topic parsing ───

/// Parsed device topic components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub device_id: String,
    pub channel: ChannelKind,
    pub segments: Vec<String>,
}

/// Parse a topic string into its components.
/// Returns `None` if the topic doesn't match the device hierarchy.
pub fn parse_topic(topic: &str) -> Option<ParsedTopic> {
    let rest = topic.strip_prefix(PREFIX)?.strip_prefix('/')?;
    let mut parts = rest.split('/');

    let device_id = parts.next().filter(|id| !id.is_empty())?;
    let channel = ChannelKind::from_segment(parts.next()?)?;
    let segments: Vec<String> = parts.map(String::from).collect();

    if channel != ChannelKind::Events && !segments.is_empty() {
        return None;
    }

    Some(ParsedTopic {
        device_id: device_id.to_string(),
        channel,
        segments,
    })
}
