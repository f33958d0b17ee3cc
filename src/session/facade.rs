//! Session facade and actor
//!
//! [`ChatSession`] is the single entry point for a UI. Intent methods push a
//! [`SessionCommand`] onto the actor's queue and return immediately; state is
//! read from the latest [`SessionSnapshot`].
//!
//! The [`SessionActor`] task is the only writer. It `select!`s over consumer
//! commands, transport events and the pending connect deadline.

use super::connection::{BrokerSettings, ConnectionManager};
use super::pipeline::{self, IgnoreReason, IntakeOutcome, SendRejection};
use super::state::{SessionSnapshot, SessionStatus, SessionStore};
use crate::config::{ChatConfig, StatusLanguage};
use crate::error::{sanitize_error_message, ChatError};
use crate::observability::{session_span, MetricsSnapshot, SessionMetrics};
use crate::protocol::{encode, validate_display_name, ChatMessage, CHAT_TOPIC};
use crate::transport::{Credentials, EventEnvelope, Transport, TransportEvent};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Everything a session needs besides its transport
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub broker_url: String,
    pub topic: String,
    pub client_id_prefix: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub identity: String,
    pub language: StatusLanguage,
    /// Insert sent messages immediately instead of waiting for the broker echo
    pub local_echo: bool,
}

impl SessionSettings {
    /// Defaults for `broker_url` with a random English identity
    pub fn new(broker_url: impl Into<String>) -> Self {
        let language = StatusLanguage::default();
        Self {
            broker_url: broker_url.into(),
            topic: CHAT_TOPIC.to_string(),
            client_id_prefix: "mqttchat".to_string(),
            keep_alive: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
            identity: language.random_identity(),
            language,
            local_echo: false,
        }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            broker_url: config.mqtt.broker_url.clone(),
            topic: config.mqtt.topic.clone(),
            client_id_prefix: config.mqtt.client_id_prefix.clone(),
            keep_alive: config.keep_alive(),
            connect_timeout: config.connect_timeout(),
            identity: config.identity_or_random(),
            language: config.chat.language,
            local_echo: config.chat.local_echo,
        }
    }

    fn broker(&self) -> BrokerSettings {
        BrokerSettings {
            broker_url: self.broker_url.clone(),
            topic: self.topic.clone(),
            client_id_prefix: self.client_id_prefix.clone(),
            keep_alive: self.keep_alive,
            connect_timeout: self.connect_timeout,
        }
    }
}

/// Consumer intents, processed in order by the actor
#[derive(Debug)]
pub enum SessionCommand {
    SetIdentity(String),
    SetCredentials(Credentials),
    Connect,
    Send(String),
    Disconnect,
    /// Acknowledged once every earlier command has been handled
    Sync(oneshot::Sender<()>),
    Shutdown,
}

/// Handle to a running chat session
pub struct ChatSession {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
    metrics: Arc<SessionMetrics>,
    handle: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Start the session actor. Must be called inside a tokio runtime.
    pub fn spawn<T: Transport>(transport: T, settings: SessionSettings) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(SessionMetrics::new());

        let store = SessionStore::new(settings.identity.clone(), settings.language);
        let snapshots = store.subscribe();
        let connection =
            ConnectionManager::new(transport, settings.broker(), events_tx, Arc::clone(&metrics));
        let span = session_span!(client_id = %connection.client_id());

        let actor = SessionActor {
            connection,
            store,
            credentials: None,
            local_echo: settings.local_echo,
            pending_echoes: HashSet::new(),
            connect_deadline: None,
            metrics: Arc::clone(&metrics),
            commands: commands_rx,
            events: events_rx,
        };
        let handle = tokio::spawn(actor.run().instrument(span));

        Self {
            commands: commands_tx,
            snapshots,
            metrics,
            handle: Some(handle),
        }
    }

    fn dispatch(&self, command: SessionCommand) {
        if self.commands.send(command).is_err() {
            debug!("Session actor already stopped, command dropped");
        }
    }

    /// Change the display name. Ignored while connecting or connected.
    pub fn set_identity(&self, name: impl Into<String>) {
        self.dispatch(SessionCommand::SetIdentity(name.into()));
    }

    /// Credentials for the next connect
    pub fn set_credentials(&self, username: impl Into<String>, password: impl Into<String>) {
        self.dispatch(SessionCommand::SetCredentials(Credentials::new(
            username, password,
        )));
    }

    pub fn connect(&self) {
        self.dispatch(SessionCommand::Connect);
    }

    pub fn send(&self, text: impl Into<String>) {
        self.dispatch(SessionCommand::Send(text.into()));
    }

    pub fn disconnect(&self) {
        self.dispatch(SessionCommand::Disconnect);
    }

    /// Wait until every intent issued so far has been handled
    pub async fn sync(&self) {
        let (tx, rx) = oneshot::channel();
        self.dispatch(SessionCommand::Sync(tx));
        let _ = rx.await;
    }

    /// Disconnect and wait for the actor to stop
    pub async fn shutdown(mut self) {
        self.dispatch(SessionCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Session actor ended abnormally: {}", e);
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.snapshots.borrow().status
    }

    pub fn status_text(&self) -> String {
        self.snapshots.borrow().status_text.clone()
    }

    pub fn messages(&self) -> Arc<Vec<ChatMessage>> {
        Arc::clone(&self.snapshots.borrow().messages)
    }

    pub fn identity(&self) -> String {
        self.snapshots.borrow().identity.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        // The actor disconnects on its way out
        if self.handle.is_some() {
            let _ = self.commands.send(SessionCommand::Shutdown);
        }
    }
}

/// Owns the connection and the store for one session
pub struct SessionActor<T: Transport> {
    connection: ConnectionManager<T>,
    store: SessionStore,
    // Kept for reconnects; never logged
    credentials: Option<Credentials>,
    local_echo: bool,
    // Ids inserted on send whose broker echo has not arrived yet
    pending_echoes: HashSet<String>,
    connect_deadline: Option<Instant>,
    metrics: Arc<SessionMetrics>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedReceiver<EventEnvelope>,
}

impl<T: Transport> SessionActor<T> {
    async fn run(mut self) {
        info!(identity = %self.store.identity(), "Chat session started");

        loop {
            let deadline = self.connect_deadline;
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },

                Some(envelope) = self.events.recv() => self.handle_event(envelope).await,

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.handle_connect_timeout().await;
                }
            }
        }

        // Teardown always closes the transport
        self.connection.disconnect().await;
        self.store.set_status(SessionStatus::Disconnected);
        info!("Chat session stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SetIdentity(name) => self.set_identity(name),
            SessionCommand::SetCredentials(credentials) => {
                debug!(username = %credentials.username, "Credentials updated");
                self.credentials = Some(credentials);
            }
            SessionCommand::Connect => self.connect().await,
            SessionCommand::Send(text) => self.send(text).await,
            SessionCommand::Disconnect => self.disconnect().await,
            SessionCommand::Sync(ack) => {
                let _ = ack.send(());
            }
            // Handled by the run loop
            SessionCommand::Shutdown => {}
        }
    }

    fn set_identity(&mut self, name: String) {
        let name = name.trim().to_string();
        if let Err(e) = validate_display_name(&name) {
            let err = ChatError::from(e);
            warn!(failure = err.kind().as_str(), error = %err, "Identity rejected");
            return;
        }

        let status = self.store.status();
        if status.is_active() {
            warn!(
                failure = "invalid_identity",
                status = %status,
                "Identity cannot change while connecting or connected"
            );
            return;
        }

        if self.store.set_identity(name) {
            self.pending_echoes.clear();
            info!(identity = %self.store.identity(), "Identity changed, message log cleared");
        }
    }

    async fn connect(&mut self) {
        let status = self.store.status();
        if status.is_active() {
            info!(status = %status, "Connect ignored, session already active");
            return;
        }

        self.store.set_status(SessionStatus::Connecting);
        let identity = self.store.identity().to_string();

        match self
            .connection
            .connect(&identity, self.credentials.clone())
            .await
        {
            Ok(()) => {
                self.connect_deadline = Some(Instant::now() + self.connection.connect_timeout());
            }
            Err(err) => self.connect_failed(err),
        }
    }

    fn connect_failed(&mut self, err: ChatError) {
        self.connect_deadline = None;
        self.metrics.connection_failed();
        error!(failure = err.kind().as_str(), error = %err.public_message(), "Connect failed");
        self.store
            .fail(SessionStatus::ConnectionError, err.public_message());
    }

    async fn handle_connect_timeout(&mut self) {
        self.connect_deadline = None;
        if self.store.status() != SessionStatus::Connecting {
            return;
        }
        let timeout = self.connection.connect_timeout();
        self.connect_failed(ChatError::connect_failure(format!(
            "no acknowledgement from broker within {}s",
            timeout.as_secs_f32()
        )));
        // Abandon the attempt so a late acknowledgement is stale
        self.connection.disconnect().await;
    }

    async fn send(&mut self, text: String) {
        let message = match pipeline::prepare_outbound(
            self.store.status(),
            self.store.identity(),
            &text,
        ) {
            Ok(message) => message,
            Err(SendRejection::BlankText) => {
                debug!("Blank message not sent");
                self.metrics.send_dropped();
                return;
            }
            Err(SendRejection::NotConnected(status)) => {
                debug!(status = %status, "Send dropped, session not connected");
                self.metrics.send_dropped();
                return;
            }
        };

        let payload = encode(&message);
        let id = message.id().to_string();
        if self.local_echo {
            self.pending_echoes.insert(id.clone());
            self.store.append(message);
        }

        match self.connection.publish(payload).await {
            Ok(()) => debug!(message_id = %id, "Message published"),
            Err(err) => {
                self.pending_echoes.remove(&id);
                self.metrics.publish_failed();
                warn!(
                    failure = err.kind().as_str(),
                    message_id = %id,
                    error = %err.public_message(),
                    "Publish failed"
                );
            }
        }
    }

    async fn disconnect(&mut self) {
        self.connect_deadline = None;
        self.connection.disconnect().await;
        self.store.set_status(SessionStatus::Disconnected);
        info!("Disconnected");
    }

    async fn handle_event(&mut self, envelope: EventEnvelope) {
        if !self.connection.accepts(&envelope) {
            debug!(
                epoch = envelope.epoch,
                current = self.connection.epoch(),
                "Discarding event from superseded connection"
            );
            return;
        }

        let status = self.store.status();
        match envelope.event {
            TransportEvent::Connected => {
                if status != SessionStatus::Connecting {
                    debug!(status = %status, "Unexpected acknowledgement ignored");
                    return;
                }
                self.connect_deadline = None;
                self.metrics.connection_established();
                self.store.set_status(SessionStatus::Connected);
                info!(topic = %self.connection.topic(), "Connected, subscribing");

                if let Err(err) = self.connection.subscribe().await {
                    self.metrics.subscribe_failed();
                    warn!(failure = err.kind().as_str(), error = %err, "Subscribe failed");
                }
            }
            TransportEvent::ConnectFailed(reason) => {
                if status != SessionStatus::Connecting {
                    debug!(status = %status, "Late connect failure ignored");
                    return;
                }
                self.connect_failed(ChatError::connect_failure(reason));
            }
            TransportEvent::Subscribed { topic } => {
                info!(topic = %topic, "Subscribed");
            }
            TransportEvent::SubscribeRejected { topic, reason } => {
                self.metrics.subscribe_failed();
                let err = ChatError::subscribe_failure(format!("{topic}: {reason}"));
                warn!(failure = err.kind().as_str(), error = %err, "Subscription rejected");
            }
            TransportEvent::MessageReceived { topic, payload } => {
                self.intake(&topic, &payload);
            }
            TransportEvent::ConnectionLost(reason) => {
                if status != SessionStatus::Connected {
                    debug!(status = %status, "Loss report ignored");
                    return;
                }
                let err = ChatError::unsolicited_disconnect(sanitize_error_message(&reason));
                self.metrics.connection_lost();
                warn!(failure = err.kind().as_str(), error = %err, "Connection lost");
                self.store
                    .fail(SessionStatus::ConnectionLost, err.public_message());
            }
        }
    }

    fn intake(&mut self, topic: &str, payload: &[u8]) {
        let pending = &self.pending_echoes;
        let outcome = pipeline::process_delivery(
            self.store.status(),
            self.connection.topic(),
            self.store.identity(),
            topic,
            payload,
            |id| pending.contains(id),
        );

        match outcome {
            IntakeOutcome::Append(message) => {
                debug!(message_id = %message.id(), sender = %message.sender(), "Message received");
                self.metrics.message_received();
                self.store.append(message);
            }
            IntakeOutcome::LocalEcho(id) => {
                self.pending_echoes.remove(&id);
                debug!(message_id = %id, "Echo of a locally inserted message");
            }
            IntakeOutcome::Ignored(IgnoreReason::ForeignTopic(topic)) => {
                self.metrics.payload_ignored();
                debug!(topic = %topic, "Delivery on unexpected topic ignored");
            }
            IntakeOutcome::Ignored(IgnoreReason::NotConnected(status)) => {
                self.metrics.payload_ignored();
                debug!(status = %status, "Delivery while not connected ignored");
            }
            IntakeOutcome::Rejected(e) => {
                self.metrics.decode_failed();
                let err = ChatError::from(e);
                warn!(failure = err.kind().as_str(), error = %err, "Inbound payload dropped");
            }
        }
    }
}
