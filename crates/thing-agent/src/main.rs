//! Thing agent: example device runtime.
//!
//! Connects one device to its cloud registry, acknowledges every config
//! with an `ok` state, publishes sample telemetry and periodic status
//! events until interrupted.

use std::time::Duration;

use anyhow::Context as _;
use tracing_subscriber::EnvFilter;

use thing_agent::config::AgentConfig;
use thing_agent::{handler, status};
use thing_mqtt::{Context, Thing, ThingError, load_credentials};

/// Upper bound for the initial connect, including the TLS handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "thing-agent starting");

    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/thing/agent.toml".to_string());

    let config = AgentConfig::from_file(&config_path)?;
    tracing::info!(
        client_id = %config.device.client_id(),
        server = %config.mqtt.server_address,
        "config loaded"
    );

    // ── Credentials ─────────────────────────────────────────────
    let credentials = load_credentials(&config.mqtt.cert_path, &config.mqtt.key_path)
        .context("failed to load device credentials")?;

    let mut options = config.thing_options(credentials)?;
    options.config_handler = Some(thing_mqtt::config_handler(handler::on_config));

    // ── Connect ─────────────────────────────────────────────────
    let thing = Thing::new(options);
    thing
        .connect(
            &Context::with_timeout(CONNECT_TIMEOUT),
            &config.mqtt.server_address,
        )
        .await
        .with_context(|| format!("failed to connect to {}", config.mqtt.server_address))?;

    // ── Sample telemetry ────────────────────────────────────────
    let ctx = Context::background();
    let samples: [(&[u8], &[&str]); 3] = [
        (b"Top level telemetry event", &[]),
        (b"Sub folder telemetry event", &["a"]),
        (b"Sub folder telemetry event", &["a", "b"]),
    ];
    for (payload, segments) in samples {
        match thing.publish_event(&ctx, payload, segments).await {
            Ok(()) => tracing::info!(folder = %segments.join("/"), "telemetry event sent"),
            Err(ThingError::NotConnected { queued }) => {
                tracing::warn!(queued, "telemetry event not sent, broker unreachable");
            }
            Err(e) => tracing::warn!(error = %e, "failed to publish telemetry event"),
        }
    }

    tracing::info!("thing-agent ready");

    // ── Run until interrupted ───────────────────────────────────
    let start_time = tokio::time::Instant::now();
    let status_interval = Duration::from_secs(config.status_interval_secs);

    tokio::select! {
        () = status::run(&thing, status_interval, start_time), if !status_interval.is_zero() => {
            tracing::error!("status loop exited unexpectedly");
        }
        // Graceful shutdown on SIGINT/SIGTERM
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    if let Err(e) = thing
        .disconnect(&Context::with_timeout(DISCONNECT_TIMEOUT))
        .await
    {
        tracing::warn!(error = %e, "disconnect failed");
    }

    tracing::info!("thing-agent stopped");
    Ok(())
}
