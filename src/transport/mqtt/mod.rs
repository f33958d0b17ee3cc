//! MQTT transport built on rumqttc
//!
//! Split the same way as the rest of the transport code: pure functions
//! first, I/O last.
//!
//! - [`connection`] - Broker URL parsing and rumqttc option building
//! - [`message_handler`] - Pure routing of event-loop output
//! - [`client`] - The [`Transport`](crate::transport::Transport) implementation
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqttchat::transport::mqtt::MqttClient;
//! use mqttchat::transport::{ConnectOptions, EventSink, Transport};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let (tx, mut events) = tokio::sync::mpsc::unbounded_channel();
//! let mut client = MqttClient::new();
//! client
//!     .connect(
//!         ConnectOptions {
//!             broker_url: "mqtt://localhost:1883".to_string(),
//!             client_id: "mqttchat-demo".to_string(),
//!             credentials: None,
//!             keep_alive: Duration::from_secs(20),
//!             connect_timeout: Duration::from_secs(10),
//!         },
//!         EventSink::new(1, tx),
//!     )
//!     .await?;
//! let outcome = events.recv().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

// Re-export public types for convenience
pub use client::MqttClient;
pub use connection::{configure_mqtt_options, parse_broker_url, BrokerEndpoint, MqttError};
pub use message_handler::{EventRoute, MessageHandler};
