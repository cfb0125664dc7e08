//! Config handling: acknowledge every config with a state update.

use std::time::Duration;

use thing_mqtt::{Context, Thing, ThingError};

/// State reported after a config has been applied.
pub const ACK_STATE: &[u8] = b"ok";

const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Apply a config payload and report the resulting state.
///
/// The agent has nothing to reconfigure yet, so applying means logging
/// the payload and reporting `ok`.
pub async fn on_config(thing: Thing, config: Vec<u8>) {
    match std::str::from_utf8(&config) {
        Ok(text) => tracing::info!(bytes = config.len(), config = %text, "config received"),
        Err(_) => tracing::info!(bytes = config.len(), "binary config received"),
    }

    match thing
        .publish_state(&Context::with_timeout(ACK_TIMEOUT), ACK_STATE)
        .await
    {
        Ok(()) => tracing::debug!("config acknowledged"),
        Err(ThingError::NotConnected { queued: true }) => {
            tracing::info!("config acknowledgement queued until reconnect");
        }
        Err(e) => tracing::error!(error = %e, "failed to acknowledge config"),
    }
}
