//! Error types for the thing session client.

use thiserror::Error;

/// Errors raised by a broker client (the MQTT transport).
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("disconnect error: {0}")]
    Disconnect(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),

    #[error("invalid server address '{0}'")]
    InvalidAddress(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("{0}")]
    Other(String),
}

/// Convenience alias for MQTT results.
pub type MqttResult<T> = Result<T, MqttError>;

/// Errors loading keys or signing auth tokens.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read '{path}': {reason}")]
    Read { path: String, reason: String },

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Convenience alias for credential results.
pub type CredentialResult<T> = Result<T, CredentialError>;

/// Errors from the offline message queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue I/O error: {0}")]
    Io(String),

    #[error("queue serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias for queue results.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors returned by [`Thing`](crate::Thing) operations.
#[derive(Debug, Error)]
pub enum ThingError {
    /// Identity or credentials missing or invalid. No network I/O was attempted.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Transport(#[from] MqttError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    TimedOut,

    /// Publish attempted while disconnected. `queued` reports whether the
    /// offline queue persisted the message for later delivery.
    #[error("not connected (message queued: {queued})")]
    NotConnected { queued: bool },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl ThingError {
    /// True for both explicit cancellation and an expired deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::TimedOut)
    }
}

/// Convenience alias for thing results.
pub type ThingResult<T> = Result<T, ThingError>;
