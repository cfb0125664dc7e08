//! E2E tests for the connect / publish / disconnect lifecycle.

mod helpers;

use std::time::Duration;

use helpers::{SERVER, TestDevice};
use thing_mqtt::{BrokerClient, Context, MqttError, QoS, ThingError, ThingOptions};

/// The canonical device session: connect, send telemetry at three
/// folder depths, disconnect.
#[tokio::test]
async fn e2e_example_session() {
    let d = TestDevice::new("deviceName");
    let ctx = Context::background();

    d.thing.connect(&ctx, SERVER).await.unwrap();
    assert!(d.thing.is_connected());
    assert_eq!(d.mqtt.connected_to(), vec![SERVER.to_string()]);
    assert_eq!(
        d.mqtt.client_id().as_deref(),
        Some("projects/my-project/locations/asia-east1/registries/my-registry/devices/deviceName")
    );

    d.thing
        .publish_event(&ctx, b"Top level telemetry event", &[])
        .await
        .unwrap();
    d.thing
        .publish_event(&ctx, b"Sub folder telemetry event", &["a"])
        .await
        .unwrap();
    d.thing
        .publish_event(&ctx, b"Sub folder telemetry event", &["a", "b"])
        .await
        .unwrap();

    assert_eq!(
        d.mqtt.published_to("/devices/deviceName/events"),
        vec![b"Top level telemetry event".to_vec()]
    );
    assert_eq!(
        d.mqtt.published_to("/devices/deviceName/events/a"),
        vec![b"Sub folder telemetry event".to_vec()]
    );
    assert_eq!(
        d.mqtt.published_to("/devices/deviceName/events/a/b"),
        vec![b"Sub folder telemetry event".to_vec()]
    );
    assert!(d.mqtt.published().iter().all(|m| m.qos == QoS::AtLeastOnce));

    d.thing.disconnect(&ctx).await.unwrap();
    assert!(!d.thing.is_connected());
    assert!(!d.mqtt.is_connected());
}

/// Empty options fail with a configuration error and never touch the broker.
#[tokio::test]
async fn e2e_empty_options_rejected() {
    let d = TestDevice::with_options(ThingOptions::default());
    let err = d
        .thing
        .connect(&Context::background(), SERVER)
        .await
        .unwrap_err();

    assert!(matches!(err, ThingError::Configuration(_)));
    assert!(d.mqtt.connected_to().is_empty());
    assert!(d.mqtt.credentials_provider().is_none());
}

/// Connecting twice keeps the first session but refreshes the provider.
#[tokio::test]
async fn e2e_connect_is_idempotent() {
    let d = TestDevice::new("rpi-001");
    d.connect().await;
    d.connect().await;

    assert_eq!(d.mqtt.connected_to().len(), 1);
    assert_eq!(
        d.mqtt.subscriptions(),
        vec![(d.config_topic(), QoS::ExactlyOnce)]
    );
    let (username, password) = d
        .mqtt
        .credentials_provider()
        .unwrap()
        .credentials()
        .unwrap();
    assert_eq!(username, "unused");
    assert_eq!(password.split('.').count(), 3);
}

/// Custom QoS levels reach the transport and the publishes.
#[tokio::test]
async fn e2e_custom_qos_levels() {
    let mut options = helpers::options("rpi-002");
    options.event_qos = QoS::AtMostOnce;
    options.state_qos = QoS::ExactlyOnce;
    options.config_qos = QoS::AtLeastOnce;
    let d = TestDevice::with_options(options);
    let ctx = Context::background();
    d.connect().await;

    d.thing.publish_event(&ctx, b"e", &[]).await.unwrap();
    d.thing.publish_state(&ctx, b"s").await.unwrap();

    let published = d.mqtt.published();
    assert_eq!(published[0].qos, QoS::AtMostOnce);
    assert_eq!(published[1].qos, QoS::ExactlyOnce);
    assert_eq!(
        d.mqtt.subscriptions(),
        vec![(d.config_topic(), QoS::AtLeastOnce)]
    );
}

/// A refused connection surfaces unchanged and leaves nothing half open.
#[tokio::test]
async fn e2e_transport_failure_then_recovery() {
    let d = TestDevice::new("rpi-003");
    d.mqtt.fail_next_connect("connection refused");

    let err = d
        .thing
        .connect(&Context::background(), SERVER)
        .await
        .unwrap_err();
    assert!(matches!(err, ThingError::Transport(MqttError::Connection(_))));
    assert!(!d.thing.is_connected());
    assert!(d.mqtt.subscriptions().is_empty());

    d.connect().await;
    assert!(d.thing.is_connected());
    assert_eq!(d.mqtt.subscriptions().len(), 1);
}

/// A slow broker plus a short deadline: timed out, still disconnected.
#[tokio::test]
async fn e2e_connect_deadline() {
    let d = TestDevice::new("rpi-004");
    d.mqtt.set_connect_delay(Duration::from_secs(5));

    let err = d
        .thing
        .connect(&Context::with_timeout(Duration::from_millis(50)), SERVER)
        .await
        .unwrap_err();
    assert!(err.is_cancellation());
    assert!(!d.thing.is_connected());
    assert!(d.thing.server_address().is_none());
}

/// Devices sharing nothing but a broker keep separate topics.
#[tokio::test]
async fn e2e_two_devices_isolated() {
    let a = TestDevice::new("sensor-a");
    let b = TestDevice::new("sensor-b");
    a.connect().await;
    b.connect().await;

    let ctx = Context::background();
    a.thing.publish_state(&ctx, b"a-state").await.unwrap();
    b.thing.publish_state(&ctx, b"b-state").await.unwrap();

    assert_eq!(a.mqtt.published_to(&a.state_topic()), vec![b"a-state".to_vec()]);
    assert!(a.mqtt.published_to(&b.state_topic()).is_empty());
    assert_eq!(b.mqtt.published_to(&b.state_topic()), vec![b"b-state".to_vec()]);
}
