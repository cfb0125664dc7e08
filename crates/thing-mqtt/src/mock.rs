//! Mock broker client for testing without a real broker.
//!
//! Records connects, subscriptions and published messages for assertion
//! in tests, and lets tests inject inbound messages with `receive`.

use async_trait::async_trait;
use rumqttc::QoS;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::broker::{BrokerClient, ClientFactory, ConnectSettings, Message, MessageHandler};
use crate::error::{MqttError, MqttResult};
use crate::options::ThingOptions;
use crate::token::CredentialsProvider;

#[derive(Default)]
struct MockState {
    connected: bool,
    connected_to: Vec<String>,
    disconnects: usize,
    settings: Option<ConnectSettings>,
    credentials: Option<CredentialsProvider>,
    subscriptions: HashMap<String, (QoS, MessageHandler)>,
    published: Vec<Message>,
    connect_error: Option<String>,
    publish_error: Option<String>,
    subscribe_error: Option<String>,
    connect_delay: Option<Duration>,
}

/// Mock implementation of the `BrokerClient` trait.
///
/// Stores all state in memory for test verification.
/// Thread-safe via `Mutex` (fine for test contexts).
#[derive(Default)]
pub struct MockBrokerClient {
    state: Mutex<MockState>,
}

impl MockBrokerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory that hands this mock to every `Thing` built with it.
    pub fn factory(self: &Arc<Self>) -> ClientFactory {
        let mock = self.clone();
        Arc::new(move |_options: &ThingOptions| mock.clone() as Arc<dyn BrokerClient>)
    }

    /// Server addresses of every successful connect, oldest first.
    pub fn connected_to(&self) -> Vec<String> {
        self.state.lock().unwrap().connected_to.clone()
    }

    /// Number of disconnects performed while connected.
    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }

    /// Settings passed to the last connect.
    pub fn connect_settings(&self) -> Option<ConnectSettings> {
        self.state.lock().unwrap().settings.clone()
    }

    /// Client id passed to the last connect.
    pub fn client_id(&self) -> Option<String> {
        self.connect_settings().map(|s| s.client_id)
    }

    /// The most recently installed credentials provider.
    pub fn credentials_provider(&self) -> Option<CredentialsProvider> {
        self.state.lock().unwrap().credentials.clone()
    }

    /// Active subscriptions as `(topic, qos)`.
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .map(|(topic, (qos, _))| (topic.clone(), *qos))
            .collect()
    }

    pub fn is_subscribed_to(&self, topic: &str) -> bool {
        self.state.lock().unwrap().subscriptions.contains_key(topic)
    }

    /// Get all published messages.
    pub fn published(&self) -> Vec<Message> {
        self.state.lock().unwrap().published.clone()
    }

    /// Payloads published to a specific topic, in publish order.
    pub fn published_to(&self, topic: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Get the last published message.
    pub fn last_published(&self) -> Option<Message> {
        self.state.lock().unwrap().published.last().cloned()
    }

    /// Deliver an inbound message to the handler subscribed to `topic`.
    ///
    /// Runs the handler to completion on the caller's task. Returns `false`
    /// when nothing is subscribed to the topic.
    pub async fn receive(&self, topic: &str, payload: &[u8]) -> bool {
        let handler = {
            let state = self.state.lock().unwrap();
            let found = state.subscriptions.get(topic).map(|(qos, h)| (*qos, h.clone()));
            found
        };
        let Some((qos, handler)) = handler else {
            return false;
        };
        handler(Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
        })
        .await;
        true
    }

    /// Make the next connect fail with a connection error.
    pub fn fail_next_connect(&self, reason: impl Into<String>) {
        self.state.lock().unwrap().connect_error = Some(reason.into());
    }

    /// Make the next publish fail with a publish error.
    pub fn fail_next_publish(&self, reason: impl Into<String>) {
        self.state.lock().unwrap().publish_error = Some(reason.into());
    }

    /// Make the next subscribe fail with a subscribe error.
    pub fn fail_next_subscribe(&self, reason: impl Into<String>) {
        self.state.lock().unwrap().subscribe_error = Some(reason.into());
    }

    /// Delay every connect, to exercise cancellation.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().unwrap().connect_delay = Some(delay);
    }

    /// Simulate the transport losing its connection.
    pub fn drop_connection(&self) {
        self.state.lock().unwrap().connected = false;
    }

    /// Clear recorded publishes.
    pub fn reset(&self) {
        self.state.lock().unwrap().published.clear();
    }
}

#[async_trait]
impl BrokerClient for MockBrokerClient {
    fn set_credentials_provider(&self, provider: CredentialsProvider) {
        self.state.lock().unwrap().credentials = Some(provider);
    }

    async fn connect(&self, address: &str, settings: ConnectSettings) -> MqttResult<()> {
        let delay = self.state.lock().unwrap().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        // The real transport asks for credentials on every connect.
        settings
            .credentials
            .credentials()
            .map_err(|e| MqttError::Connection(e.to_string()))?;

        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.connect_error.take() {
            return Err(MqttError::Connection(reason));
        }
        state.connected = true;
        state.connected_to.push(address.to_string());
        state.subscriptions.clear();
        state.credentials = Some(settings.credentials.clone());
        state.settings = Some(settings);
        Ok(())
    }

    async fn disconnect(&self) -> MqttResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.connected {
            state.connected = false;
            state.disconnects += 1;
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, qos: QoS, payload: &[u8]) -> MqttResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.publish_error.take() {
            return Err(MqttError::Publish(reason));
        }
        state.published.push(Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS, handler: MessageHandler) -> MqttResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.subscribe_error.take() {
            return Err(MqttError::Subscribe(reason));
        }
        state.subscriptions.insert(topic.to_string(), (qos, handler));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::BoxFuture;

    #[tokio::test]
    async fn publish_records_messages() {
        let mock = MockBrokerClient::new();
        mock.publish("test/topic", QoS::AtLeastOnce, b"hello")
            .await
            .unwrap();
        mock.publish("test/other", QoS::AtMostOnce, b"world")
            .await
            .unwrap();

        let msgs = mock.published();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].topic, "test/topic");
        assert_eq!(msgs[0].payload, b"hello");
        assert_eq!(msgs[1].topic, "test/other");
        assert_eq!(mock.last_published().unwrap().qos, QoS::AtMostOnce);
    }

    #[tokio::test]
    async fn published_to_filter() {
        let mock = MockBrokerClient::new();
        mock.publish("topic/a", QoS::AtMostOnce, b"1").await.unwrap();
        mock.publish("topic/b", QoS::AtMostOnce, b"2").await.unwrap();
        mock.publish("topic/a", QoS::AtMostOnce, b"3").await.unwrap();

        assert_eq!(mock.published_to("topic/a"), vec![b"1".to_vec(), b"3".to_vec()]);
    }

    #[tokio::test]
    async fn receive_routes_to_subscriber() {
        let mock = MockBrokerClient::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: MessageHandler = Arc::new(move |msg: Message| -> BoxFuture<'static, ()> {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().push(msg.payload);
            })
        });
        mock.subscribe("/devices/d/config", QoS::ExactlyOnce, handler)
            .await
            .unwrap();

        assert!(mock.receive("/devices/d/config", b"cfg").await);
        assert!(!mock.receive("/devices/d/other", b"x").await);
        assert_eq!(*seen.lock().unwrap(), vec![b"cfg".to_vec()]);
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let mock = MockBrokerClient::new();
        mock.fail_next_publish("broker busy");
        assert!(matches!(
            mock.publish("t", QoS::AtMostOnce, b"d").await,
            Err(MqttError::Publish(_))
        ));
        assert!(mock.publish("t", QoS::AtMostOnce, b"d").await.is_ok());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let mock = MockBrokerClient::new();
        mock.disconnect().await.unwrap();
        assert_eq!(mock.disconnects(), 0);
        assert!(!mock.is_connected());
    }

    #[tokio::test]
    async fn reset_clears_publishes() {
        let mock = MockBrokerClient::new();
        mock.publish("t", QoS::AtMostOnce, b"d").await.unwrap();
        mock.reset();
        assert!(mock.published().is_empty());
    }
}
