//! Shared test harness for E2E integration tests.
//!
//! Wires a real `Thing` to a shared `MockBrokerClient`, loading the
//! checked-in test keys through the public credential loader, so every
//! test exercises real code paths across crate boundaries.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thing_mqtt::{
    Context, Credentials, Identity, MockBrokerClient, Thing, ThingOptions, load_credentials,
};

pub const SERVER: &str = "ssl://mqtt.googleapis.com:443";

/// Directory holding the PEM test keys.
pub fn test_keys() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../thing-mqtt/test_keys")
}

/// RSA credentials loaded from certificate and key files.
pub fn rsa_credentials() -> Credentials {
    let keys = test_keys();
    load_credentials(keys.join("rsa_cert.pem"), keys.join("rsa_private.pem")).unwrap()
}

/// EC (P-256) credentials loaded from certificate and key files.
pub fn ec_credentials() -> Credentials {
    let keys = test_keys();
    load_credentials(keys.join("ec_cert.pem"), keys.join("ec_private.pem")).unwrap()
}

pub fn identity(device_id: &str) -> Identity {
    Identity::new("my-project", "asia-east1", "my-registry", device_id)
}

/// Default options for `device_id`, signed with the RSA test key.
pub fn options(device_id: &str) -> ThingOptions {
    ThingOptions::new(identity(device_id), rsa_credentials())
}

/// A thing backed by its own mock broker.
pub struct TestDevice {
    pub thing: Thing,
    pub mqtt: Arc<MockBrokerClient>,
    pub device_id: String,
}

impl TestDevice {
    pub fn new(device_id: &str) -> Self {
        Self::with_options(options(device_id))
    }

    pub fn with_options(options: ThingOptions) -> Self {
        Self::on_broker(options, Arc::new(MockBrokerClient::new()))
    }

    /// A thing sharing an existing mock broker (e.g. a restarted device).
    pub fn on_broker(options: ThingOptions, mqtt: Arc<MockBrokerClient>) -> Self {
        let device_id = options
            .identity
            .as_ref()
            .map(|id| id.device_id.clone())
            .unwrap_or_default();
        Self {
            thing: Thing::with_factory(options, mqtt.factory()),
            mqtt,
            device_id,
        }
    }

    pub async fn connect(&self) {
        self.thing
            .connect(&Context::background(), SERVER)
            .await
            .unwrap();
    }

    pub fn config_topic(&self) -> String {
        thing_protocol::topics::config(&self.device_id)
    }

    pub fn state_topic(&self) -> String {
        thing_protocol::topics::state(&self.device_id)
    }

    pub fn events_topic(&self, segments: &[&str]) -> String {
        thing_protocol::topics::events(&self.device_id, segments)
    }

    /// Deliver a config payload from the "cloud".
    pub async fn push_config(&self, config: &[u8]) -> bool {
        self.mqtt.receive(&self.config_topic(), config).await
    }
}
