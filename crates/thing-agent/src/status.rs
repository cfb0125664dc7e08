//! Periodic status publisher.
//!
//! Sends a `Status` event at a configurable interval so the cloud
//! knows the device is alive.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time;

use thing_mqtt::{Context, Thing, ThingError};

/// Events sub-folder status messages are published under.
pub const STATUS_SEGMENT: &str = "status";

/// Timeout for a single status publish.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Liveness report published under `/devices/{id}/events/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub device_id: String,
    pub connected_since_secs: u64,
    pub agent_version: String,
    pub timestamp: DateTime<Utc>,
}

/// Publish one status event.
pub async fn publish(thing: &Thing, start_time: time::Instant) -> Result<(), ThingError> {
    let device_id = thing
        .options()
        .identity
        .as_ref()
        .map(|id| id.device_id.clone())
        .unwrap_or_default();
    let status = Status {
        device_id,
        connected_since_secs: start_time.elapsed().as_secs(),
        agent_version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    };
    let payload = serde_json::to_vec(&status)
        .map_err(|e| ThingError::Configuration(format!("status serialization: {e}")))?;

    thing
        .publish_event(&Context::with_timeout(PUBLISH_TIMEOUT), &payload, &[STATUS_SEGMENT])
        .await
}

/// Run the status loop, publishing at `interval`.
///
/// This function runs forever until the task is cancelled. Intended
/// to be raced against shutdown in `tokio::select!`.
pub async fn run(thing: &Thing, interval: Duration, start_time: time::Instant) {
    let mut ticker = time::interval(interval);
    // Skip the first tick (fires immediately).
    ticker.tick().await;

    loop {
        ticker.tick().await;

        match publish(thing, start_time).await {
            Ok(()) => tracing::debug!("status sent"),
            Err(ThingError::NotConnected { queued }) => {
                tracing::warn!(queued, "status not sent, broker unreachable");
            }
            Err(e) => tracing::warn!(error = %e, "failed to publish status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use thing_mqtt::{Credentials, Identity, MockBrokerClient, ThingOptions};

    fn mock_thing() -> (Thing, Arc<MockBrokerClient>) {
        let key = concat!(env!("CARGO_MANIFEST_DIR"), "/../thing-mqtt/test_keys/rsa_private.pem");
        let credentials = Credentials::from_key_pem(&std::fs::read(key).unwrap()).unwrap();
        let options = ThingOptions::new(Identity::new("p", "l", "r", "rpi-001"), credentials);
        let mock = Arc::new(MockBrokerClient::new());
        (Thing::with_factory(options, mock.factory()), mock)
    }

    #[tokio::test]
    async fn status_published_as_nested_event() {
        let (thing, mock) = mock_thing();
        thing
            .connect(&Context::background(), "tcp://localhost:1883")
            .await
            .unwrap();

        publish(&thing, time::Instant::now()).await.unwrap();

        let payloads = mock.published_to("/devices/rpi-001/events/status");
        assert_eq!(payloads.len(), 1);
        let json: serde_json::Value = serde_json::from_slice(&payloads[0]).unwrap();
        assert_eq!(json["device_id"], "rpi-001");
        assert_eq!(json["agent_version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn status_while_disconnected_is_not_connected() {
        let (thing, mock) = mock_thing();
        let err = publish(&thing, time::Instant::now()).await.unwrap_err();
        assert!(matches!(err, ThingError::NotConnected { queued: false }));
        assert!(mock.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_publishes_each_interval() {
        let (thing, mock) = mock_thing();
        thing
            .connect(&Context::background(), "tcp://localhost:1883")
            .await
            .unwrap();

        let start = time::Instant::now();
        let _ = time::timeout(Duration::from_secs(35), run(&thing, Duration::from_secs(10), start)).await;

        assert_eq!(mock.published_to("/devices/rpi-001/events/status").len(), 3);
    }
}
