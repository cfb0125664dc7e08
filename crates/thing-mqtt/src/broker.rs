//! Broker client capability: the transport seam a `Thing` drives.
//!
//! `RumqttBrokerClient` is the production implementation and
//! `MockBrokerClient` the in-memory double for tests. A `Thing` builds its
//! client through a [`ClientFactory`], so tests can inject the double
//! without any process-wide state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::QoS;

use crate::error::MqttResult;
use crate::options::{BoxFuture, Loggers, ThingOptions};
use crate::token::CredentialsProvider;

/// An MQTT message, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// Callback for messages arriving on a subscribed topic.
pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// QoS levels per logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosConfig {
    pub event: QoS,
    pub state: QoS,
    pub config: QoS,
}

/// Everything the transport needs for one connect.
#[derive(Clone, Debug)]
pub struct ConnectSettings {
    pub client_id: String,
    pub credentials: CredentialsProvider,
    pub qos: QosConfig,
    pub keep_alive: Duration,
    pub ca_certificate_path: Option<PathBuf>,
    pub loggers: Loggers,
    pub log_mqtt: bool,
}

/// Abstraction over the MQTT transport.
///
/// Implementations must tolerate `disconnect` when already disconnected
/// and must report connectivity from their live state.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Install the provider consulted on every physical (re)connect.
    fn set_credentials_provider(&self, provider: CredentialsProvider);

    /// Open a session to `address` (e.g. `ssl://mqtt.example.com:8883`).
    async fn connect(&self, address: &str, settings: ConnectSettings) -> MqttResult<()>;

    async fn disconnect(&self) -> MqttResult<()>;

    async fn publish(&self, topic: &str, qos: QoS, payload: &[u8]) -> MqttResult<()>;

    /// Subscribe to an exact topic, routing its messages to `handler`.
    async fn subscribe(&self, topic: &str, qos: QoS, handler: MessageHandler) -> MqttResult<()>;

    fn is_connected(&self) -> bool;
}

/// Builds the broker client a `Thing` will own.
pub type ClientFactory = Arc<dyn Fn(&ThingOptions) -> Arc<dyn BrokerClient> + Send + Sync>;

/// Numeric MQTT QoS level.
pub fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

/// QoS for a numeric level, `None` above 2.
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}
