//! Transport layer for chat traffic
//!
//! The broker connection sits behind the [`Transport`] trait so the session
//! core can run against the real MQTT client or the in-process broker stub.
//! Requests are issued through async methods that return as soon as the
//! request is handed off; outcomes (connection acknowledged, refused, lost,
//! inbound deliveries, subscription results) arrive later as
//! [`TransportEvent`]s on the [`EventSink`] registered at connect time.

use rumqttc::v5::mqttbytes::QoS;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

pub mod mqtt;

/// Username/password pair submitted to the broker
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Everything needed to open one broker connection
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub broker_url: String,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

/// Asynchronous outcome reported by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker acknowledged the connect request
    Connected,
    /// Connect was refused, timed out or failed at the network level
    ConnectFailed(String),
    /// Broker confirmed the subscription
    Subscribed { topic: String },
    /// Broker rejected the subscription
    SubscribeRejected { topic: String, reason: String },
    /// Inbound delivery
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Connection dropped without a consumer request
    ConnectionLost(String),
}

/// Event tagged with the connect attempt that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub epoch: u64,
    pub event: TransportEvent,
}

/// Callback registration handed to a transport on every connect
///
/// Each connect attempt gets a new epoch; receivers discard envelopes from
/// superseded attempts.
#[derive(Debug, Clone)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<EventEnvelope>,
}

impl EventSink {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<EventEnvelope>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Deliver an event; returns false once the receiving session is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(EventEnvelope {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

/// Narrow publish/subscribe transport
#[async_trait::async_trait]
pub trait Transport: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Issue a connect request. The result arrives on `events` as
    /// [`TransportEvent::Connected`] or [`TransportEvent::ConnectFailed`].
    /// An `Err` means the request could not even be issued.
    async fn connect(&mut self, options: ConnectOptions, events: EventSink)
        -> Result<(), Self::Error>;

    /// Issue a subscribe request on the current connection
    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Self::Error>;

    /// Issue a publish request on the current connection
    async fn publish(&mut self, topic: &str, payload: Vec<u8>, qos: QoS)
        -> Result<(), Self::Error>;

    /// Close the current connection, if any. Closing an absent connection is Ok.
    async fn disconnect(&mut self) -> Result<(), Self::Error>;
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
