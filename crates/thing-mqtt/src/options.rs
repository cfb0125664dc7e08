//! Session options for a [`Thing`](crate::Thing).

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::QoS;
use thing_protocol::Identity;

use crate::credentials::Credentials;
use crate::error::{ThingError, ThingResult};
use crate::thing::Thing;

/// Lifetime of signed auth tokens unless configured otherwise.
pub const DEFAULT_AUTH_TOKEN_EXPIRATION: Duration = Duration::from_secs(60 * 60);

/// MQTT keep-alive interval unless configured otherwise.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Boxed future returned by callbacks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Receives the raw payload of every config message, together with the
/// thing it arrived on.
pub type ConfigHandler = Arc<dyn Fn(Thing, Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`ConfigHandler`].
///
/// ```ignore
/// options.config_handler = Some(config_handler(|thing, config| async move {
///     let _ = thing.publish_state(&Context::background(), b"ok").await;
/// }));
/// ```
pub fn config_handler<F, Fut>(handler: F) -> ConfigHandler
where
    F: Fn(Thing, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |thing: Thing, payload: Vec<u8>| -> BoxFuture<'static, ()> {
        Box::pin(handler(thing, payload))
    })
}

/// A plain-text log sink.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Optional debug/info/error sinks.
///
/// Messages always go to `tracing`; a sink, when set, receives a copy.
#[derive(Clone, Default)]
pub struct Loggers {
    pub debug: Option<LogSink>,
    pub info: Option<LogSink>,
    pub error: Option<LogSink>,
}

impl Loggers {
    pub fn debug(&self, message: &str) {
        tracing::debug!("{message}");
        if let Some(sink) = &self.debug {
            sink(message);
        }
    }

    pub fn info(&self, message: &str) {
        tracing::info!("{message}");
        if let Some(sink) = &self.info {
            sink(message);
        }
    }

    pub fn error(&self, message: &str) {
        tracing::error!("{message}");
        if let Some(sink) = &self.error {
            sink(message);
        }
    }
}

impl std::fmt::Debug for Loggers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loggers")
            .field("debug", &self.debug.is_some())
            .field("info", &self.info.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

/// Everything a [`Thing`] needs to run a session.
///
/// `ThingOptions::default()` is the empty value: it has no identity or
/// credentials and fails at connect time with a configuration error.
#[derive(Clone)]
pub struct ThingOptions {
    pub identity: Option<Identity>,
    pub credentials: Option<Arc<Credentials>>,
    /// QoS for events. Default: at least once.
    pub event_qos: QoS,
    /// QoS for state. Default: at least once.
    pub state_qos: QoS,
    /// QoS for the config subscription. Default: exactly once.
    pub config_qos: QoS,
    /// Zero means every connect signs a new token.
    pub auth_token_expiration: Duration,
    pub keep_alive: Duration,
    /// Trust anchor for TLS connections. The platform roots are used when unset.
    pub ca_certificate_path: Option<PathBuf>,
    /// Directory for messages published while disconnected.
    pub queue_directory: Option<PathBuf>,
    pub loggers: Loggers,
    /// Forward transport events to the debug sink.
    pub log_mqtt: bool,
    pub config_handler: Option<ConfigHandler>,
}

impl ThingOptions {
    /// Options with the default QoS levels and token lifetime.
    pub fn new(identity: Identity, credentials: impl Into<Arc<Credentials>>) -> Self {
        Self {
            identity: Some(identity),
            credentials: Some(credentials.into()),
            ..Self::default()
        }
    }

    pub fn with_config_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Thing, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.config_handler = Some(config_handler(handler));
        self
    }

    pub fn with_queue_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.queue_directory = Some(dir.into());
        self
    }

    /// Identity and credentials, or a configuration error naming what is missing.
    pub fn validate(&self) -> ThingResult<(&Identity, &Arc<Credentials>)> {
        let identity = self
            .identity
            .as_ref()
            .ok_or_else(|| ThingError::Configuration("identity is missing".into()))?;
        identity
            .validate()
            .map_err(|e| ThingError::Configuration(e.to_string()))?;
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| ThingError::Configuration("credentials are missing".into()))?;
        Ok((identity, credentials))
    }
}

impl Default for ThingOptions {
    fn default() -> Self {
        Self {
            identity: None,
            credentials: None,
            event_qos: QoS::AtLeastOnce,
            state_qos: QoS::AtLeastOnce,
            config_qos: QoS::ExactlyOnce,
            auth_token_expiration: DEFAULT_AUTH_TOKEN_EXPIRATION,
            keep_alive: DEFAULT_KEEP_ALIVE,
            ca_certificate_path: None,
            queue_directory: None,
            loggers: Loggers::default(),
            log_mqtt: false,
            config_handler: None,
        }
    }
}

impl std::fmt::Debug for ThingOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThingOptions")
            .field("identity", &self.identity)
            .field("credentials", &self.credentials)
            .field("event_qos", &self.event_qos)
            .field("state_qos", &self.state_qos)
            .field("config_qos", &self.config_qos)
            .field("auth_token_expiration", &self.auth_token_expiration)
            .field("keep_alive", &self.keep_alive)
            .field("ca_certificate_path", &self.ca_certificate_path)
            .field("queue_directory", &self.queue_directory)
            .field("loggers", &self.loggers)
            .field("log_mqtt", &self.log_mqtt)
            .field("config_handler", &self.config_handler.is_some())
            .finish()
    }
}
