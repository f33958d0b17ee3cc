//! Broker connection lifecycle
//!
//! [`ConnectionManager`] issues connect, subscribe, publish and disconnect
//! requests on a [`Transport`] and tracks which connect attempt is current.
//! It never decides session status itself; the session actor does that from
//! the events this manager routes back to it.

use crate::error::{sanitize_error_message, ChatError, ChatResult};
use crate::observability::{mqtt_span, SessionMetrics};
use crate::transport::{ConnectOptions, Credentials, EventEnvelope, EventSink, Transport};
use rumqttc::v5::mqttbytes::QoS;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Chat traffic is fire-and-forget
const CHAT_QOS: QoS = QoS::AtMostOnce;

/// Broker parameters shared by every connect attempt of a session
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub broker_url: String,
    pub topic: String,
    pub client_id_prefix: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

pub struct ConnectionManager<T: Transport> {
    transport: T,
    settings: BrokerSettings,
    client_id: String,
    epoch: u64,
    events_tx: mpsc::UnboundedSender<EventEnvelope>,
    metrics: Arc<SessionMetrics>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(
        transport: T,
        settings: BrokerSettings,
        events_tx: mpsc::UnboundedSender<EventEnvelope>,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        let client_id = format!("{}-{}", settings.client_id_prefix, Uuid::new_v4().simple());
        Self {
            transport,
            settings,
            client_id,
            epoch: 0,
            events_tx,
            metrics,
        }
    }

    /// Client id used for every connect of this session
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn topic(&self) -> &str {
        &self.settings.topic
    }

    pub fn connect_timeout(&self) -> Duration {
        self.settings.connect_timeout
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether an event belongs to the current connect attempt
    pub fn accepts(&self, envelope: &EventEnvelope) -> bool {
        envelope.epoch == self.epoch
    }

    /// Issue a connect request under a new epoch. `Ok` only means the request
    /// went out; the outcome arrives later as a transport event.
    pub async fn connect(
        &mut self,
        identity: &str,
        credentials: Option<Credentials>,
    ) -> ChatResult<()> {
        self.epoch += 1;
        self.metrics.connection_attempt();

        let options = ConnectOptions {
            broker_url: self.settings.broker_url.clone(),
            client_id: self.client_id.clone(),
            credentials,
            keep_alive: self.settings.keep_alive,
            connect_timeout: self.settings.connect_timeout,
        };
        let sink = EventSink::new(self.epoch, self.events_tx.clone());
        let span = mqtt_span!(
            operation = "connect",
            client_id = %self.client_id,
            epoch = self.epoch
        );

        async {
            info!(identity = %identity, "Issuing connect request");
            self.transport
                .connect(options, sink)
                .await
                .map_err(|e| ChatError::connect_failure(sanitize_error_message(&e.to_string())))
        }
        .instrument(span)
        .await
    }

    /// Subscribe to the chat topic on the current connection
    pub async fn subscribe(&mut self) -> ChatResult<()> {
        self.metrics.subscribe_requested();
        let topic = self.settings.topic.clone();

        self.transport
            .subscribe(&topic, CHAT_QOS)
            .await
            .map_err(|e| ChatError::subscribe_failure(format!("{topic}: {e}")))?;

        debug!(topic = %topic, "Subscribe request issued");
        Ok(())
    }

    /// Publish an encoded payload on the chat topic
    pub async fn publish(&mut self, payload: Vec<u8>) -> ChatResult<()> {
        let topic = self.settings.topic.clone();
        self.transport
            .publish(&topic, payload, CHAT_QOS)
            .await
            .map_err(|e| ChatError::publish_failure(e.to_string()))?;

        self.metrics.message_published();
        Ok(())
    }

    /// Close the current connection. Events still in flight from it become
    /// stale. Transport errors are logged only.
    pub async fn disconnect(&mut self) {
        self.epoch += 1;
        if let Err(e) = self.transport.disconnect().await {
            warn!(
                error = %sanitize_error_message(&e.to_string()),
                "Transport reported an error while disconnecting"
            );
        }
        self.metrics.disconnected();
        debug!(client_id = %self.client_id, "Disconnect issued");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBroker;
    use crate::transport::TransportEvent;

    fn settings() -> BrokerSettings {
        BrokerSettings {
            broker_url: "mqtt://localhost:1883".to_string(),
            topic: "chat/messages".to_string(),
            client_id_prefix: "mqttchat".to_string(),
            keep_alive: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
        }
    }

    fn manager(
        broker: &MockBroker,
    ) -> (
        ConnectionManager<crate::testing::MockTransport>,
        mpsc::UnboundedReceiver<EventEnvelope>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(
            broker.transport(),
            settings(),
            tx,
            Arc::new(SessionMetrics::new()),
        );
        (manager, rx)
    }

    #[test]
    fn test_client_id_uses_prefix() {
        let broker = MockBroker::new();
        let (manager, _rx) = manager(&broker);
        assert!(manager.client_id().starts_with("mqttchat-"));
        assert!(manager.client_id().len() > "mqttchat-".len());
    }

    #[tokio::test]
    async fn test_connect_tags_events_with_new_epoch() {
        let broker = MockBroker::new();
        let (mut manager, mut rx) = manager(&broker);

        manager.connect("Alice", None).await.unwrap();
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event, TransportEvent::Connected);
        assert_eq!(envelope.epoch, 1);
        assert!(manager.accepts(&envelope));

        let options = broker.last_connect_options().unwrap();
        assert_eq!(options.client_id, manager.client_id());
        assert_eq!(options.keep_alive, Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_disconnect_makes_events_stale() {
        let broker = MockBroker::new();
        let (mut manager, mut rx) = manager(&broker);

        manager.connect("Alice", None).await.unwrap();
        let envelope = rx.recv().await.unwrap();
        manager.disconnect().await;

        assert!(!manager.accepts(&envelope));
        assert_eq!(broker.disconnect_requests(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_uses_chat_topic() {
        let broker = MockBroker::new();
        let (mut manager, _rx) = manager(&broker);

        manager.connect("Alice", None).await.unwrap();
        manager.subscribe().await.unwrap();
        assert_eq!(broker.subscribe_requests(), vec!["chat/messages".to_string()]);
    }

    #[tokio::test]
    async fn test_publish_without_connection_is_publish_failure() {
        let broker = MockBroker::new();
        let (mut manager, _rx) = manager(&broker);

        let err = manager.publish(b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, ChatError::PublishFailure { .. }));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_connect_issue_failure_is_connect_failure() {
        let broker = MockBroker::new();
        broker.fail_connect_requests(true);
        let (mut manager, _rx) = manager(&broker);

        let err = manager.connect("Alice", None).await.unwrap_err();
        assert!(matches!(err, ChatError::ConnectFailure { .. }));
        assert!(err.is_state_visible());
    }
}
