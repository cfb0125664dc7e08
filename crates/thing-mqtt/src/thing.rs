//! The thing: one device's broker session.
//!
//! A `Thing` owns its broker client, hands the transport a credentials
//! provider backed by the token cache, subscribes to the device's config
//! topic on connect and maps publish calls onto the state and events
//! topics. Connect and disconnect are serialized; publishing and config
//! delivery run concurrently with them.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use rumqttc::QoS;
use thing_protocol::{ChannelKind, Identity, topics};

use crate::broker::{
    BrokerClient, ClientFactory, ConnectSettings, Message, MessageHandler, QosConfig, qos_from_level,
    qos_level,
};
use crate::context::Context;
use crate::credentials::Credentials;
use crate::error::{ThingError, ThingResult};
use crate::lock;
use crate::options::{BoxFuture, ThingOptions};
use crate::queue::{FileQueue, OfflineQueue};
use crate::rumqtt::RumqttBrokerClient;
use crate::token::{CredentialsProvider, TokenCache};

/// Session controller for a single device.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct Thing {
    inner: Arc<Inner>,
}

struct Inner {
    options: ThingOptions,
    factory: ClientFactory,
    client: Mutex<Option<Arc<dyn BrokerClient>>>,
    tokens: OnceLock<Arc<TokenCache>>,
    queue: Option<Arc<dyn OfflineQueue>>,
    lifecycle: tokio::sync::Mutex<()>,
    server_address: Mutex<Option<String>>,
}

impl Thing {
    /// Create a thing that connects over the rumqttc transport.
    ///
    /// Options are not validated here; invalid options fail at `connect`.
    pub fn new(options: ThingOptions) -> Self {
        Self::with_factory(options, RumqttBrokerClient::factory())
    }

    /// Create a thing whose broker client comes from `factory`.
    pub fn with_factory(options: ThingOptions, factory: ClientFactory) -> Self {
        let queue = options
            .queue_directory
            .clone()
            .map(|dir| Arc::new(FileQueue::new(dir)) as Arc<dyn OfflineQueue>);
        Self {
            inner: Arc::new(Inner {
                options,
                factory,
                client: Mutex::new(None),
                tokens: OnceLock::new(),
                queue,
                lifecycle: tokio::sync::Mutex::new(()),
                server_address: Mutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> &ThingOptions {
        &self.inner.options
    }

    /// Address of the last successful connect.
    pub fn server_address(&self) -> Option<String> {
        lock(&self.inner.server_address).clone()
    }

    /// Live connection state as reported by the broker client.
    pub fn is_connected(&self) -> bool {
        self.current_client().is_some_and(|client| client.is_connected())
    }

    /// Connect to `server_address` and subscribe to the config topic.
    ///
    /// Returns `Ok` without reconnecting when already connected. On any
    /// failure the thing is left disconnected.
    pub async fn connect(&self, ctx: &Context, server_address: &str) -> ThingResult<()> {
        let options = &self.inner.options;
        let (identity, credentials) = options.validate()?;

        let _lifecycle = ctx
            .run(async { Ok::<_, ThingError>(self.inner.lifecycle.lock().await) })
            .await?;

        let client = self.client();
        let provider = CredentialsProvider::new(self.token_cache(identity, credentials));
        client.set_credentials_provider(provider.clone());

        if client.is_connected() {
            tracing::debug!(client_id = %identity.client_id(), "already connected");
            return Ok(());
        }

        // Fail before any network I/O if the key cannot sign.
        provider.cache().token(false)?;

        let client_id = identity.client_id();
        let settings = ConnectSettings {
            client_id: client_id.clone(),
            credentials: provider,
            qos: QosConfig {
                event: options.event_qos,
                state: options.state_qos,
                config: options.config_qos,
            },
            keep_alive: options.keep_alive,
            ca_certificate_path: options.ca_certificate_path.clone(),
            loggers: options.loggers.clone(),
            log_mqtt: options.log_mqtt,
        };
        let config_topic = topics::config(&identity.device_id);

        let result = ctx
            .run(async {
                client.connect(server_address, settings).await?;
                client
                    .subscribe(&config_topic, options.config_qos, self.config_subscription())
                    .await?;
                Ok::<_, ThingError>(())
            })
            .await;

        if let Err(e) = result {
            if let Err(rollback) = client.disconnect().await {
                options
                    .loggers
                    .error(&format!("disconnect after failed connect: {rollback}"));
            }
            options
                .loggers
                .error(&format!("connect to {server_address} failed: {e}"));
            return Err(e);
        }

        *lock(&self.inner.server_address) = Some(server_address.to_string());
        options
            .loggers
            .info(&format!("connected to {server_address} as {client_id}"));

        self.flush_queue(client.as_ref()).await;
        Ok(())
    }

    /// Disconnect from the broker. Does nothing when not connected.
    pub async fn disconnect(&self, ctx: &Context) -> ThingResult<()> {
        let _lifecycle = ctx
            .run(async { Ok::<_, ThingError>(self.inner.lifecycle.lock().await) })
            .await?;

        let Some(client) = self.current_client() else {
            return Ok(());
        };
        let was_connected = client.is_connected();

        ctx.run(async { client.disconnect().await.map_err(ThingError::from) })
            .await?;

        if was_connected {
            self.inner.options.loggers.info("disconnected");
        }
        Ok(())
    }

    /// Publish device state to `/devices/{id}/state`.
    pub async fn publish_state(&self, ctx: &Context, payload: &[u8]) -> ThingResult<()> {
        let (identity, _) = self.inner.options.validate()?;
        let topic = topics::state(&identity.device_id);
        self.publish(ctx, &topic, self.inner.options.state_qos, payload)
            .await
    }

    /// Publish an event to `/devices/{id}/events`, nested under `segments`.
    pub async fn publish_event(
        &self,
        ctx: &Context,
        payload: &[u8],
        segments: &[&str],
    ) -> ThingResult<()> {
        let (identity, _) = self.inner.options.validate()?;
        let topic = topics::events(&identity.device_id, segments);
        self.publish(ctx, &topic, self.inner.options.event_qos, payload)
            .await
    }

    async fn publish(&self, ctx: &Context, topic: &str, qos: QoS, payload: &[u8]) -> ThingResult<()> {
        let client = self
            .current_client()
            .filter(|client| client.is_connected());
        let Some(client) = client else {
            return self.park(topic, qos, payload).await;
        };

        ctx.run(async {
            client
                .publish(topic, qos, payload)
                .await
                .map_err(ThingError::from)
        })
        .await
    }

    /// Persist a message published while disconnected, if a queue is configured.
    /// Always an error: the message was not delivered.
    async fn park(&self, topic: &str, qos: QoS, payload: &[u8]) -> ThingResult<()> {
        let Some(queue) = &self.inner.queue else {
            return Err(ThingError::NotConnected { queued: false });
        };
        let queued = queue.enqueue(topic, qos_level(qos), payload).await?;
        self.inner
            .options
            .loggers
            .debug(&format!("not connected, queued message {} for {topic}", queued.id));
        Err(ThingError::NotConnected { queued: true })
    }

    /// Republish queued messages in order, stopping at the first failure.
    async fn flush_queue(&self, client: &dyn BrokerClient) {
        let Some(queue) = &self.inner.queue else {
            return;
        };
        let loggers = &self.inner.options.loggers;

        let pending = match queue.pending().await {
            Ok(pending) => pending,
            Err(e) => {
                loggers.error(&format!("failed to read offline queue: {e}"));
                return;
            }
        };
        if pending.is_empty() {
            return;
        }

        let total = pending.len();
        let mut sent = 0;
        for message in pending {
            let Some(qos) = qos_from_level(message.qos) else {
                loggers.error(&format!(
                    "dropping queued message {} with invalid QoS {}",
                    message.id, message.qos
                ));
                if let Err(e) = queue.remove(message.id).await {
                    loggers.error(&format!("failed to remove queued message: {e}"));
                    return;
                }
                continue;
            };

            if let Err(e) = client.publish(&message.topic, qos, &message.payload).await {
                loggers.error(&format!(
                    "offline queue flush stopped after {sent} of {total} messages: {e}"
                ));
                return;
            }
            if let Err(e) = queue.remove(message.id).await {
                loggers.error(&format!("failed to remove queued message {}: {e}", message.id));
                return;
            }
            sent += 1;
        }

        loggers.info(&format!("flushed {sent} queued messages"));
    }

    fn config_subscription(&self) -> MessageHandler {
        let thing: Weak<Inner> = Arc::downgrade(&self.inner);
        Arc::new(move |message: Message| -> BoxFuture<'static, ()> {
            let thing = thing.clone();
            Box::pin(async move {
                if let Some(inner) = thing.upgrade() {
                    let thing = Thing { inner };
                    thing.deliver_config(message).await;
                }
            })
        })
    }

    async fn deliver_config(&self, message: Message) {
        let options = &self.inner.options;
        let Some(identity) = &options.identity else {
            return;
        };

        let ours = topics::parse_topic(&message.topic).is_some_and(|parsed| {
            parsed.channel == ChannelKind::Config && parsed.device_id == identity.device_id
        });
        if !ours {
            tracing::warn!(topic = %message.topic, "ignoring message on unexpected topic");
            return;
        }

        if options.log_mqtt {
            options
                .loggers
                .debug(&format!("config received ({} bytes)", message.payload.len()));
        }

        match &options.config_handler {
            Some(handler) => handler(self.clone(), message.payload).await,
            None => tracing::debug!("no config handler set, config ignored"),
        }
    }

    fn token_cache(&self, identity: &Identity, credentials: &Arc<Credentials>) -> Arc<TokenCache> {
        self.inner
            .tokens
            .get_or_init(|| {
                Arc::new(TokenCache::new(
                    credentials.clone(),
                    identity.audience(),
                    self.inner.options.auth_token_expiration,
                ))
            })
            .clone()
    }

    /// The broker client, created on first use and reused afterwards.
    fn client(&self) -> Arc<dyn BrokerClient> {
        lock(&self.inner.client)
            .get_or_insert_with(|| (self.inner.factory)(&self.inner.options))
            .clone()
    }

    fn current_client(&self) -> Option<Arc<dyn BrokerClient>> {
        lock(&self.inner.client).clone()
    }
}

impl std::fmt::Debug for Thing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thing")
            .field("identity", &self.inner.options.identity)
            .field("server_address", &self.server_address())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
