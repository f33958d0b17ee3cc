//! In-process broker stub
//!
//! [`MockBroker`] stands in for an MQTT broker: it accepts or refuses
//! connects, records every request, fans published payloads back out to
//! subscribed clients and can inject deliveries or drop connections on
//! demand. [`MockTransport`] is one client's connection to it.

use crate::transport::{ConnectOptions, Credentials, EventSink, Transport, TransportEvent};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MockTransportError {
    #[error("Not connected")]
    NotConnected,
    #[error("Connect request could not be issued")]
    ConnectIssueFailed,
    #[error("Subscribe request failed")]
    SubscribeFailed,
    #[error("Publish request failed")]
    PublishFailed,
}

/// How the broker answers connect requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectBehavior {
    Accept,
    Refuse(String),
    /// Never answer
    Silent,
}

#[derive(Debug)]
struct ClientSession {
    transport_id: u64,
    sink: EventSink,
    subscriptions: Vec<String>,
}

#[derive(Debug)]
struct BrokerState {
    connect_behavior: ConnectBehavior,
    required_credentials: Option<Credentials>,
    fail_connect_requests: bool,
    fail_subscribe_requests: bool,
    reject_subscriptions: bool,
    fail_publish_requests: bool,
    echo: bool,
    sessions: Vec<ClientSession>,
    published: Vec<(String, Vec<u8>)>,
    subscribe_requests: Vec<String>,
    connect_requests: usize,
    disconnect_requests: usize,
    last_connect_options: Option<ConnectOptions>,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            connect_behavior: ConnectBehavior::Accept,
            required_credentials: None,
            fail_connect_requests: false,
            fail_subscribe_requests: false,
            reject_subscriptions: false,
            fail_publish_requests: false,
            echo: true,
            sessions: Vec::new(),
            published: Vec::new(),
            subscribe_requests: Vec::new(),
            connect_requests: 0,
            disconnect_requests: 0,
            last_connect_options: None,
        }
    }
}

impl BrokerState {
    fn session_mut(&mut self, transport_id: u64) -> Option<&mut ClientSession> {
        self.sessions
            .iter_mut()
            .find(|s| s.transport_id == transport_id)
    }
}

/// Shared broker stub; clones refer to the same broker
#[derive(Debug, Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
    next_transport_id: Arc<AtomicU64>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept connects presenting these credentials
    pub fn with_credentials(username: &str, password: &str) -> Self {
        let broker = Self::new();
        broker.state().required_credentials = Some(Credentials::new(username, password));
        broker
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        // A panicking test thread must not hide the broker from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// New client connection to this broker
    pub fn transport(&self) -> MockTransport {
        MockTransport {
            broker: self.clone(),
            id: self.next_transport_id.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        self.state().connect_behavior = behavior;
    }

    /// Make `Transport::connect` itself return an error
    pub fn fail_connect_requests(&self, fail: bool) {
        self.state().fail_connect_requests = fail;
    }

    /// Make `Transport::subscribe` itself return an error
    pub fn fail_subscribe_requests(&self, fail: bool) {
        self.state().fail_subscribe_requests = fail;
    }

    /// Accept subscribe requests but answer with a refusal
    pub fn reject_subscriptions(&self, reject: bool) {
        self.state().reject_subscriptions = reject;
    }

    pub fn fail_publish_requests(&self, fail: bool) {
        self.state().fail_publish_requests = fail;
    }

    /// Whether published payloads are delivered back to subscribers
    pub fn set_echo(&self, echo: bool) {
        self.state().echo = echo;
    }

    /// Deliver a payload to every connected client, subscribed or not
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        let payload = payload.into();
        for session in &self.state().sessions {
            session.sink.emit(TransportEvent::MessageReceived {
                topic: topic.to_string(),
                payload: payload.clone(),
            });
        }
    }

    /// Drop every connection as if the network went away
    pub fn drop_connections(&self, reason: &str) {
        let sessions = std::mem::take(&mut self.state().sessions);
        for session in sessions {
            session
                .sink
                .emit(TransportEvent::ConnectionLost(reason.to_string()));
        }
    }

    pub fn connected_clients(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state().published.clone()
    }

    pub fn subscribe_requests(&self) -> Vec<String> {
        self.state().subscribe_requests.clone()
    }

    pub fn connect_requests(&self) -> usize {
        self.state().connect_requests
    }

    pub fn disconnect_requests(&self) -> usize {
        self.state().disconnect_requests
    }

    pub fn last_connect_options(&self) -> Option<ConnectOptions> {
        self.state().last_connect_options.clone()
    }
}

/// One client connection to a [`MockBroker`]
#[derive(Debug)]
pub struct MockTransport {
    broker: MockBroker,
    id: u64,
}

impl MockTransport {
    pub fn broker(&self) -> &MockBroker {
        &self.broker
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn connect(
        &mut self,
        options: ConnectOptions,
        events: EventSink,
    ) -> Result<(), Self::Error> {
        let mut state = self.broker.state();
        state.connect_requests += 1;
        state.last_connect_options = Some(options.clone());
        state.sessions.retain(|s| s.transport_id != self.id);

        if state.fail_connect_requests {
            return Err(MockTransportError::ConnectIssueFailed);
        }

        if let Some(required) = &state.required_credentials {
            if options.credentials.as_ref() != Some(required) {
                events.emit(TransportEvent::ConnectFailed(
                    "connection refused: not authorized".to_string(),
                ));
                return Ok(());
            }
        }

        match state.connect_behavior.clone() {
            ConnectBehavior::Accept => {
                events.emit(TransportEvent::Connected);
                state.sessions.push(ClientSession {
                    transport_id: self.id,
                    sink: events,
                    subscriptions: Vec::new(),
                });
            }
            ConnectBehavior::Refuse(reason) => {
                events.emit(TransportEvent::ConnectFailed(reason));
            }
            ConnectBehavior::Silent => {}
        }
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, _qos: QoS) -> Result<(), Self::Error> {
        let mut state = self.broker.state();
        state.subscribe_requests.push(topic.to_string());

        if state.fail_subscribe_requests {
            return Err(MockTransportError::SubscribeFailed);
        }
        let reject = state.reject_subscriptions;
        let session = state
            .session_mut(self.id)
            .ok_or(MockTransportError::NotConnected)?;

        if reject {
            session.sink.emit(TransportEvent::SubscribeRejected {
                topic: topic.to_string(),
                reason: "not authorized".to_string(),
            });
        } else {
            session.subscriptions.push(topic.to_string());
            session.sink.emit(TransportEvent::Subscribed {
                topic: topic.to_string(),
            });
        }
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>, _qos: QoS) -> Result<(), Self::Error> {
        let mut state = self.broker.state();
        if state.session_mut(self.id).is_none() {
            return Err(MockTransportError::NotConnected);
        }
        if state.fail_publish_requests {
            return Err(MockTransportError::PublishFailed);
        }

        state.published.push((topic.to_string(), payload.clone()));
        if state.echo {
            for session in &state.sessions {
                if session.subscriptions.iter().any(|s| s == topic) {
                    session.sink.emit(TransportEvent::MessageReceived {
                        topic: topic.to_string(),
                        payload: payload.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        let mut state = self.broker.state();
        state.disconnect_requests += 1;
        state.sessions.retain(|s| s.transport_id != self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::EventEnvelope;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn options(credentials: Option<Credentials>) -> ConnectOptions {
        ConnectOptions {
            broker_url: "mqtt://mock:1883".to_string(),
            client_id: "mock-client".to_string(),
            credentials,
            keep_alive: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
        }
    }

    async fn connected(
        broker: &MockBroker,
    ) -> (MockTransport, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = broker.transport();
        transport
            .connect(options(None), EventSink::new(1, tx))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().event, TransportEvent::Connected);
        (transport, rx)
    }

    #[tokio::test]
    async fn test_credentials_checked() {
        let broker = MockBroker::with_credentials("alice", "secret");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = broker.transport();

        transport
            .connect(
                options(Some(Credentials::new("alice", "wrong"))),
                EventSink::new(1, tx.clone()),
            )
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await.unwrap().event,
            TransportEvent::ConnectFailed(_)
        ));

        transport
            .connect(
                options(Some(Credentials::new("alice", "secret"))),
                EventSink::new(2, tx),
            )
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().event, TransportEvent::Connected);
        assert_eq!(broker.connected_clients(), 1);
    }

    #[tokio::test]
    async fn test_publish_echoes_to_subscribers() {
        let broker = MockBroker::new();
        let (mut transport, mut rx) = connected(&broker).await;

        transport
            .subscribe("chat/messages", QoS::AtMostOnce)
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await.unwrap().event,
            TransportEvent::Subscribed { .. }
        ));

        transport
            .publish("chat/messages", b"payload".to_vec(), QoS::AtMostOnce)
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await.unwrap().event,
            TransportEvent::MessageReceived {
                topic: "chat/messages".to_string(),
                payload: b"payload".to_vec(),
            }
        );
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn test_drop_connections_reports_loss() {
        let broker = MockBroker::new();
        let (_transport, mut rx) = connected(&broker).await;

        broker.drop_connections("network unreachable");
        assert_eq!(
            rx.recv().await.unwrap().event,
            TransportEvent::ConnectionLost("network unreachable".to_string())
        );
        assert_eq!(broker.connected_clients(), 0);
    }

    #[tokio::test]
    async fn test_publish_after_disconnect_fails() {
        let broker = MockBroker::new();
        let (mut transport, _rx) = connected(&broker).await;

        transport.disconnect().await.unwrap();
        let result = transport
            .publish("chat/messages", b"x".to_vec(), QoS::AtMostOnce)
            .await;
        assert_eq!(result, Err(MockTransportError::NotConnected));
        assert_eq!(broker.disconnect_requests(), 1);
    }
}
