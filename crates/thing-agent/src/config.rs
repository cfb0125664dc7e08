//! Agent configuration, loadable from TOML.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use thing_mqtt::broker::qos_from_level;
use thing_mqtt::{Credentials, QoS, ThingOptions};
use thing_protocol::Identity;

/// Top-level configuration for the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Device identity (project, location, registry, device id).
    pub device: Identity,
    /// Broker connection settings.
    pub mqtt: MqttConfig,
    /// Status event interval in seconds. Zero disables status events.
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

/// Broker connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker address, e.g. `ssl://mqtt.googleapis.com:443`.
    #[serde(default = "default_server_address")]
    pub server_address: String,
    /// Path to device X.509 certificate (PEM).
    pub cert_path: PathBuf,
    /// Path to device private key (PEM, RSA or P-256).
    pub key_path: PathBuf,
    /// Path to CA certificate. The platform roots are used when unset.
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    #[serde(default = "default_event_qos")]
    pub event_qos: u8,
    #[serde(default = "default_state_qos")]
    pub state_qos: u8,
    #[serde(default = "default_config_qos")]
    pub config_qos: u8,
    /// Auth token lifetime in seconds. Zero signs a new token per connect.
    #[serde(default = "default_token_expiration")]
    pub auth_token_expiration_secs: u64,
    /// Directory for events and state published while offline.
    #[serde(default)]
    pub queue_directory: Option<PathBuf>,
    /// Log transport events at debug level.
    #[serde(default)]
    pub log_mqtt: bool,
}

fn default_status_interval() -> u64 {
    60
}

fn default_server_address() -> String {
    "ssl://mqtt.googleapis.com:443".to_string()
}

fn default_keepalive() -> u64 {
    60
}

fn default_event_qos() -> u8 {
    1
}

fn default_state_qos() -> u8 {
    1
}

fn default_config_qos() -> u8 {
    2
}

fn default_token_expiration() -> u64 {
    thing_mqtt::DEFAULT_AUTH_TOKEN_EXPIRATION.as_secs()
}

impl AgentConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path}"))?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Session options for this device, signed with `credentials`.
    ///
    /// The config handler is left unset for the caller to install.
    pub fn thing_options(&self, credentials: Credentials) -> anyhow::Result<ThingOptions> {
        let mqtt = &self.mqtt;
        let mut options = ThingOptions::new(self.device.clone(), credentials);
        options.event_qos = qos("event_qos", mqtt.event_qos)?;
        options.state_qos = qos("state_qos", mqtt.state_qos)?;
        options.config_qos = qos("config_qos", mqtt.config_qos)?;
        options.auth_token_expiration = Duration::from_secs(mqtt.auth_token_expiration_secs);
        options.keep_alive = Duration::from_secs(mqtt.keepalive_secs);
        options.ca_certificate_path = mqtt.ca_cert_path.clone();
        options.queue_directory = mqtt.queue_directory.clone();
        options.log_mqtt = mqtt.log_mqtt;
        Ok(options)
    }
}

fn qos(field: &str, level: u8) -> anyhow::Result<QoS> {
    qos_from_level(level).ok_or_else(|| anyhow::anyhow!("{field} must be 0, 1 or 2 (got {level})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[device]
project_id = "my-project"
location = "asia-east1"
registry = "my-registry"
device_id = "deviceName"

[mqtt]
cert_path = "/etc/thing/rsa_cert.pem"
key_path = "/etc/thing/rsa_private.pem"
"#;

    fn test_credentials() -> Credentials {
        let key = concat!(env!("CARGO_MANIFEST_DIR"), "/../thing-mqtt/test_keys/rsa_private.pem");
        Credentials::from_key_pem(&std::fs::read(key).unwrap()).unwrap()
    }

    #[test]
    fn deserialize_minimal_config() {
        let config: AgentConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.device.device_id, "deviceName");
        assert_eq!(config.mqtt.server_address, "ssl://mqtt.googleapis.com:443"); // default
        assert_eq!(config.mqtt.keepalive_secs, 60); // default
        assert_eq!(config.mqtt.auth_token_expiration_secs, 3600); // default
        assert_eq!(config.status_interval_secs, 60); // default
        assert!(config.mqtt.queue_directory.is_none());
        assert!(config.mqtt.ca_cert_path.is_none());
        assert!(!config.mqtt.log_mqtt);
    }

    #[test]
    fn deserialize_full_config() {
        let toml = r#"
status_interval_secs = 15

[device]
project_id = "p"
location = "l"
registry = "r"
device_id = "sbc-042"

[mqtt]
server_address = "tcp://localhost:1883"
cert_path = "/certs/cert.pem"
key_path = "/certs/key.pem"
ca_cert_path = "/certs/ca.pem"
keepalive_secs = 30
event_qos = 0
state_qos = 2
config_qos = 1
auth_token_expiration_secs = 0
queue_directory = "/var/lib/thing/queue"
log_mqtt = true
"#;
        let config: AgentConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.status_interval_secs, 15);
        assert_eq!(config.mqtt.server_address, "tcp://localhost:1883");
        assert_eq!(config.mqtt.event_qos, 0);
        assert_eq!(
            config.mqtt.queue_directory.as_deref(),
            Some(std::path::Path::new("/var/lib/thing/queue"))
        );
        assert!(config.mqtt.log_mqtt);
    }

    #[test]
    fn missing_device_table_rejected() {
        let toml = r#"
[mqtt]
cert_path = "/certs/cert.pem"
key_path = "/certs/key.pem"
"#;
        assert!(toml::from_str::<AgentConfig>(toml).is_err());
    }

    #[test]
    fn thing_options_from_config() {
        let mut config: AgentConfig = toml::from_str(MINIMAL).unwrap();
        config.mqtt.event_qos = 0;
        config.mqtt.auth_token_expiration_secs = 0;

        let options = config.thing_options(test_credentials()).unwrap();
        assert_eq!(options.identity.as_ref(), Some(&config.device));
        assert_eq!(options.event_qos, QoS::AtMostOnce);
        assert_eq!(options.state_qos, QoS::AtLeastOnce);
        assert_eq!(options.config_qos, QoS::ExactlyOnce);
        assert_eq!(options.auth_token_expiration, Duration::ZERO);
        assert_eq!(options.keep_alive, Duration::from_secs(60));
        assert!(options.config_handler.is_none());
    }

    #[test]
    fn invalid_qos_rejected() {
        let mut config: AgentConfig = toml::from_str(MINIMAL).unwrap();
        config.mqtt.config_qos = 3;
        let err = config.thing_options(test_credentials()).unwrap_err();
        assert!(err.to_string().contains("config_qos"));
    }
}
