//! Production broker client backed by `rumqttc`.
//!
//! Each connect starts a session: an event-loop driver task and a
//! delivery task. The driver polls the rumqttc `EventLoop`, tracks the
//! live connection state, reconnects after transport errors (asking the
//! credentials provider for a fresh token first) and re-subscribes once
//! the broker accepts the new connection. Inbound publishes are handed to
//! the delivery task, which runs the subscription handlers one at a time
//! in arrival order, so a handler may publish without stalling the event
//! loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::broker::{BrokerClient, ClientFactory, ConnectSettings, Message, MessageHandler};
use crate::error::{MqttError, MqttResult};
use crate::lock;
use crate::options::{Loggers, ThingOptions};
use crate::tls::{self, ServerAddress};
use crate::token::CredentialsProvider;

/// Capacity of the rumqttc request channel.
const REQUEST_CAPACITY: usize = 64;

/// Pause between reconnect attempts after a transport error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How long a disconnect waits for the driver to flush the DISCONNECT packet.
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    credentials: Mutex<Option<CredentialsProvider>>,
    handlers: Mutex<HashMap<String, (QoS, MessageHandler)>>,
}

struct Session {
    client: AsyncClient,
    shutdown: watch::Sender<bool>,
    driver: JoinHandle<()>,
}

impl Session {
    /// Wait for the driver to exit on its own, forcing it after `grace`.
    async fn finish(mut self, grace: Duration) {
        if tokio::time::timeout(grace, &mut self.driver).await.is_err() {
            self.shutdown.send_replace(true);
            self.driver.abort();
        }
    }

    async fn stop(self) {
        self.shutdown.send_replace(true);
        self.finish(DISCONNECT_GRACE).await;
    }
}

/// MQTT broker client over `rumqttc`, with TLS and auto-reconnect.
#[derive(Default)]
pub struct RumqttBrokerClient {
    shared: Arc<Shared>,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl RumqttBrokerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory producing a fresh rumqttc client per thing.
    pub fn factory() -> ClientFactory {
        Arc::new(|_options: &ThingOptions| Arc::new(RumqttBrokerClient::new()) as Arc<dyn BrokerClient>)
    }

    async fn client(&self) -> Option<AsyncClient> {
        self.session.lock().await.as_ref().map(|s| s.client.clone())
    }
}

#[async_trait]
impl BrokerClient for RumqttBrokerClient {
    fn set_credentials_provider(&self, provider: CredentialsProvider) {
        *lock(&self.shared.credentials) = Some(provider);
    }

    async fn connect(&self, address: &str, settings: ConnectSettings) -> MqttResult<()> {
        let server = ServerAddress::parse(address)?;
        let transport = tls::transport(&server, settings.ca_certificate_path.as_deref())?;
        let (username, password) = settings
            .credentials
            .credentials()
            .map_err(|e| MqttError::Connection(format!("credentials unavailable: {e}")))?;

        let mut session = self.session.lock().await;
        if let Some(stale) = session.take() {
            stale.stop().await;
        }

        let mut options = MqttOptions::new(&settings.client_id, &server.host, server.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_session(true);
        options.set_credentials(username, password);
        options.set_transport(transport);

        *lock(&self.shared.credentials) = Some(settings.credentials.clone());
        lock(&self.shared.handlers).clear();

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (deliver_tx, deliver_rx) = mpsc::unbounded_channel();

        tokio::spawn(deliver(deliver_rx, self.shared.clone()));
        let driver = tokio::spawn(drive(Driver {
            eventloop,
            client: client.clone(),
            shared: self.shared.clone(),
            loggers: settings.loggers.clone(),
            log_mqtt: settings.log_mqtt,
            ready: Some(ready_tx),
            shutdown: shutdown_rx,
            deliver: deliver_tx,
        }));
        let new_session = Session {
            client,
            shutdown: shutdown_tx,
            driver,
        };

        tracing::debug!(server = %server, client_id = %settings.client_id, "connecting to broker");

        match ready_rx.await {
            Ok(Ok(())) => {
                *session = Some(new_session);
                Ok(())
            }
            Ok(Err(e)) => {
                new_session.stop().await;
                Err(e)
            }
            Err(_) => {
                new_session.stop().await;
                Err(MqttError::Connection(
                    "event loop stopped before the broker acknowledged".into(),
                ))
            }
        }
    }

    async fn disconnect(&self) -> MqttResult<()> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };

        let was_connected = self.shared.connected.load(Ordering::SeqCst);
        let result = if was_connected {
            let result = session
                .client
                .disconnect()
                .await
                .map_err(|e| MqttError::Disconnect(e.to_string()));
            session.finish(DISCONNECT_GRACE).await;
            result
        } else {
            session.stop().await;
            Ok(())
        };

        self.shared.connected.store(false, Ordering::SeqCst);
        result
    }

    async fn publish(&self, topic: &str, qos: QoS, payload: &[u8]) -> MqttResult<()> {
        let client = self
            .client()
            .await
            .ok_or_else(|| MqttError::Publish("no active session".into()))?;
        client
            .publish(topic, qos, false, payload.to_vec())
            .await
            .map_err(|e| MqttError::Publish(e.to_string()))
    }

    async fn subscribe(&self, topic: &str, qos: QoS, handler: MessageHandler) -> MqttResult<()> {
        let client = self
            .client()
            .await
            .ok_or_else(|| MqttError::Subscribe("no active session".into()))?;
        lock(&self.shared.handlers).insert(topic.to_string(), (qos, handler));
        client
            .subscribe(topic, qos)
            .await
            .map_err(|e| MqttError::Subscribe(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

struct Driver {
    eventloop: EventLoop,
    client: AsyncClient,
    shared: Arc<Shared>,
    loggers: Loggers,
    log_mqtt: bool,
    ready: Option<oneshot::Sender<MqttResult<()>>>,
    shutdown: watch::Receiver<bool>,
    deliver: mpsc::UnboundedSender<Message>,
}

async fn drive(mut d: Driver) {
    loop {
        let event = tokio::select! {
            _ = d.shutdown.changed() => break,
            event = d.eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                d.shared.connected.store(true, Ordering::SeqCst);
                if let Some(ready) = d.ready.take() {
                    // Connect caller went away (cancelled): abandon the session.
                    if ready.send(Ok(())).is_err() {
                        break;
                    }
                    d.loggers.debug("broker accepted connection");
                } else {
                    d.loggers.info("reconnected to broker");
                    resubscribe(&d.client, &d.shared, &d.loggers);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if d.log_mqtt {
                    d.loggers.debug(&format!(
                        "inbound publish on {} ({} bytes)",
                        publish.topic,
                        publish.payload.len()
                    ));
                }
                let message = Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                    qos: publish.qos,
                };
                if d.deliver.send(message).is_err() {
                    tracing::warn!("delivery task gone, dropping inbound message");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(event) => {
                if d.log_mqtt {
                    d.loggers.debug(&format!("mqtt event: {event:?}"));
                }
            }
            Err(e) => {
                d.shared.connected.store(false, Ordering::SeqCst);
                if let Some(ready) = d.ready.take() {
                    let _ = ready.send(Err(MqttError::Connection(e.to_string())));
                    break;
                }

                d.loggers.error(&format!(
                    "connection lost: {e}, reconnecting in {}s",
                    RECONNECT_DELAY.as_secs()
                ));
                tokio::select! {
                    _ = d.shutdown.changed() => break,
                    () = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
                refresh_credentials(&mut d.eventloop, &d.shared, &d.loggers);
            }
        }
    }

    d.shared.connected.store(false, Ordering::SeqCst);
}

/// Load a fresh password into the event loop before it reconnects.
fn refresh_credentials(eventloop: &mut EventLoop, shared: &Shared, loggers: &Loggers) {
    let provider = lock(&shared.credentials).clone();
    let Some(provider) = provider else {
        return;
    };
    match provider.credentials() {
        Ok((username, password)) => {
            eventloop.mqtt_options.set_credentials(username, password);
        }
        Err(e) => loggers.error(&format!("failed to refresh credentials: {e}")),
    }
}

/// Restore subscriptions on a clean reconnect.
///
/// Uses `try_subscribe` because the driver itself drains the request channel.
fn resubscribe(client: &AsyncClient, shared: &Shared, loggers: &Loggers) {
    let topics: Vec<(String, QoS)> = lock(&shared.handlers)
        .iter()
        .map(|(topic, (qos, _))| (topic.clone(), *qos))
        .collect();
    for (topic, qos) in topics {
        if let Err(e) = client.try_subscribe(topic.as_str(), qos) {
            loggers.error(&format!("failed to restore subscription to {topic}: {e}"));
        }
    }
}

async fn deliver(mut rx: mpsc::UnboundedReceiver<Message>, shared: Arc<Shared>) {
    while let Some(message) = rx.recv().await {
        let handler = lock(&shared.handlers)
            .get(&message.topic)
            .map(|(_, handler)| handler.clone());
        match handler {
            Some(handler) => handler(message).await,
            None => tracing::debug!(topic = %message.topic, "no handler for inbound message"),
        }
    }
}
