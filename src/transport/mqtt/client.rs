//! Impure I/O operations for MQTT client
//!
//! This module owns the rumqttc client and the task polling its event loop.
//! Every decision about what an event means is delegated to
//! [`MessageHandler`]; this file only moves bytes and reports outcomes.

use super::connection::{configure_mqtt_options, MqttError};
use super::message_handler::{EventRoute, MessageHandler};
use crate::error::sanitize_error_message;
use crate::transport::{ConnectOptions, EventSink, Transport, TransportEvent};
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Requests buffered between the client handle and the event loop
const REQUEST_CAPACITY: usize = 10;

/// How long disconnect waits for the event loop task before aborting it
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// MQTT transport backed by rumqttc
///
/// One instance handles any number of sequential connections. Each
/// [`Transport::connect`] call tears down the previous event loop and starts
/// a new one bound to the supplied [`EventSink`].
pub struct MqttClient {
    client: Option<AsyncClient>,
    event_loop_handle: Option<JoinHandle<()>>,
    closing_tx: Option<watch::Sender<bool>>,
    // Topics awaiting a SubAck, in request order
    pending_subscriptions: Arc<Mutex<VecDeque<String>>>,
}

impl MqttClient {
    pub fn new() -> Self {
        Self {
            client: None,
            event_loop_handle: None,
            closing_tx: None,
            pending_subscriptions: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// True while an event loop task is running
    pub fn is_active(&self) -> bool {
        self.event_loop_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Poll the event loop until the connection ends. A requested close keeps
    /// polling until our DISCONNECT is on the wire and reports nothing.
    /// Reports the connect outcome exactly once.
    async fn run_event_loop(
        mut event_loop: EventLoop,
        events: EventSink,
        connect_timeout: Duration,
        mut closing_rx: watch::Receiver<bool>,
        pending_subscriptions: Arc<Mutex<VecDeque<String>>>,
    ) {
        let epoch = events.epoch();
        let mut acknowledged = false;
        let mut closing = false;
        let deadline = tokio::time::sleep(connect_timeout);
        tokio::pin!(deadline);

        debug!(epoch, "MQTT event loop started");

        loop {
            tokio::select! {
                changed = closing_rx.changed(), if !closing => {
                    if changed.is_err() || *closing_rx.borrow() {
                        closing = true;
                        if !acknowledged {
                            debug!(epoch, "Close requested before ConnAck, stopping event loop");
                            break;
                        }
                        debug!(epoch, "Close requested, flushing DISCONNECT");
                    }
                }

                _ = &mut deadline, if !acknowledged && !closing => {
                    warn!(epoch, timeout_secs = connect_timeout.as_secs(), "No ConnAck before deadline");
                    events.emit(TransportEvent::ConnectFailed(format!(
                        "no acknowledgement from broker within {}s",
                        connect_timeout.as_secs()
                    )));
                    break;
                }

                polled = event_loop.poll() => {
                    match polled {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            if !Self::process_event_route(
                                route,
                                &events,
                                &mut acknowledged,
                                &pending_subscriptions,
                            ) {
                                break;
                            }
                        }
                        Err(e) => {
                            if closing || *closing_rx.borrow() {
                                debug!(epoch, "Event loop ended during requested close");
                                break;
                            }
                            let reason = sanitize_error_message(&e.to_string());
                            if acknowledged {
                                warn!(epoch, error = %reason, "MQTT connection lost");
                                events.emit(TransportEvent::ConnectionLost(reason));
                            } else {
                                warn!(epoch, error = %reason, "MQTT connect failed");
                                events.emit(TransportEvent::ConnectFailed(reason));
                            }
                            break;
                        }
                    }
                }
            }
        }

        debug!(epoch, "MQTT event loop stopped");
    }

    /// Act on one routed event. Returns false when the loop should stop.
    fn process_event_route(
        route: EventRoute,
        events: &EventSink,
        acknowledged: &mut bool,
        pending_subscriptions: &Arc<Mutex<VecDeque<String>>>,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                *acknowledged = true;
                events.emit(TransportEvent::Connected)
            }
            EventRoute::MessageReceived { topic, payload } => {
                debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);
                events.emit(TransportEvent::MessageReceived { topic, payload })
            }
            EventRoute::SubscriptionResult { packet_id, granted } => {
                let topic = pending_subscriptions
                    .lock()
                    .ok()
                    .and_then(|mut pending| pending.pop_front())
                    .unwrap_or_default();
                debug!(target: "mqtt_transport", packet_id, granted, "SubAck for {}", topic);
                if granted {
                    events.emit(TransportEvent::Subscribed { topic })
                } else {
                    events.emit(TransportEvent::SubscribeRejected {
                        topic,
                        reason: "broker refused subscription".to_string(),
                    })
                }
            }
            EventRoute::Disconnected => {
                let reason = "broker closed the connection".to_string();
                if *acknowledged {
                    events.emit(TransportEvent::ConnectionLost(reason));
                } else {
                    events.emit(TransportEvent::ConnectFailed(reason));
                }
                false
            }
            EventRoute::DisconnectSent => {
                debug!(target: "mqtt_transport", "DISCONNECT sent");
                false
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    fn client(&self) -> Result<&AsyncClient, MqttError> {
        match &self.client {
            Some(client) if self.is_active() => Ok(client),
            _ => Err(MqttError::NotConnected),
        }
    }
}

impl Default for MqttClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(
        &mut self,
        options: ConnectOptions,
        events: EventSink,
    ) -> Result<(), Self::Error> {
        if self.client.is_some() {
            if let Err(e) = Transport::disconnect(self).await {
                warn!("Failed to close previous connection: {}", e);
            }
        }

        let mqtt_options = configure_mqtt_options(&options)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let (closing_tx, closing_rx) = watch::channel(false);

        if let Ok(mut pending) = self.pending_subscriptions.lock() {
            pending.clear();
        }

        info!(
            client_id = %options.client_id,
            broker = %sanitize_error_message(&options.broker_url),
            epoch = events.epoch(),
            "Connecting to MQTT broker"
        );

        let handle = tokio::spawn(Self::run_event_loop(
            event_loop,
            events,
            options.connect_timeout,
            closing_rx,
            Arc::clone(&self.pending_subscriptions),
        ));

        self.client = Some(client);
        self.closing_tx = Some(closing_tx);
        self.event_loop_handle = Some(handle);
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Self::Error> {
        let client = self.client()?;

        if let Ok(mut pending) = self.pending_subscriptions.lock() {
            pending.push_back(topic.to_string());
        }

        if let Err(e) = client.subscribe(topic, qos).await {
            if let Ok(mut pending) = self.pending_subscriptions.lock() {
                pending.pop_back();
            }
            return Err(MqttError::SubscriptionFailed(
                format!("Failed to subscribe to {topic}: {e}").into(),
            ));
        }

        debug!(target: "mqtt_transport", "Subscribe requested: {}", topic);
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), Self::Error> {
        let client = self.client()?;
        client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(target: "mqtt_transport", "Published to {}", topic);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };

        // The loop keeps polling until DISCONNECT is written, but must not
        // report the resulting close as a loss
        if let Some(closing_tx) = self.closing_tx.take() {
            let _ = closing_tx.send(true);
        }

        if let Err(e) = client.disconnect().await {
            debug!("Connection already closed: {}", e);
        }

        if let Some(mut handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, forcing abort");
                    handle.abort();
                }
                _ => {}
            }
        }

        if let Ok(mut pending) = self.pending_subscriptions.lock() {
            pending.clear();
        }

        info!("MQTT client disconnected");
        Ok(())
    }
}
