//! MQTT session client for cloud IoT devices.
//!
//! Keeps one device's session with a cloud broker:
//! - `Thing` connects with short-lived JWT credentials, subscribes to the
//!   config topic and publishes state and events
//! - `TokenCache` signs tokens from the device key and reuses them until expiry
//! - `BrokerClient` trait for the transport (mockable in tests)
//! - `RumqttBrokerClient` with TLS and auto-reconnect for production
//! - `MockBrokerClient` for testing without a broker
//! - `FileQueue` for messages published while offline

pub mod broker;
pub mod context;
pub mod credentials;
pub mod error;
pub mod mock;
pub mod options;
pub mod queue;
pub mod rumqtt;
pub mod thing;
pub mod tls;
pub mod token;

// Re-exports for convenience.
pub use broker::{BrokerClient, ClientFactory, ConnectSettings, Message, MessageHandler, QosConfig};
pub use context::{CancelHandle, Context};
pub use credentials::{Credentials, load_credentials};
pub use error::{CredentialError, MqttError, MqttResult, QueueError, ThingError, ThingResult};
pub use mock::MockBrokerClient;
pub use options::{
    ConfigHandler, DEFAULT_AUTH_TOKEN_EXPIRATION, DEFAULT_KEEP_ALIVE, Loggers, ThingOptions,
    config_handler,
};
pub use queue::{FileQueue, OfflineQueue, QueuedMessage};
pub use rumqtt::RumqttBrokerClient;
pub use thing::Thing;
pub use token::{CredentialsProvider, TokenCache};

pub use rumqttc::QoS;
pub use thing_protocol::Identity;

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
