//! mqttchat - chat sessions over an MQTT broker
//!
//! Client-side pub/sub session management for a single-topic chat room:
//! connection lifecycle, topic subscription, message encoding and decoding,
//! and state propagation to a UI.
//!
//! # Overview
//!
//! - [`protocol`] - Chat message type, JSON wire codec and topic validation
//! - [`session`] - Observable session state, connection manager, publish and
//!   intake pipeline, and the [`ChatSession`] facade
//! - [`transport`] - The [`Transport`](transport::Transport) seam and its
//!   rumqttc binding
//! - [`config`] - TOML configuration with credentials taken from the environment
//! - [`observability`] - Structured logging and per-session counters
//! - [`testing`] - In-process broker stub
//!
//! # Quick Start
//!
//! ```rust
//! use mqttchat::session::{ChatSession, SessionSettings, SessionStatus};
//! use mqttchat::testing::MockBroker;
//!
//! # tokio_test::block_on(async {
//! let broker = MockBroker::new();
//! let mut settings = SessionSettings::new("mqtt://localhost:1883");
//! settings.identity = "Alice".to_string();
//!
//! let session = ChatSession::spawn(broker.transport(), settings);
//! let mut state = session.subscribe();
//!
//! session.connect();
//! state.wait_for(|s| s.status == SessionStatus::Connected).await.unwrap();
//!
//! session.send("hi");
//! let snapshot = state.wait_for(|s| !s.messages.is_empty()).await.unwrap().clone();
//! assert!(snapshot.messages[0].is_own());
//!
//! session.shutdown().await;
//! # });
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ChatConfig, StatusLanguage};
pub use error::{ChatError, ChatResult};
pub use protocol::{ChatMessage, DecodeError};
pub use session::{ChatSession, SessionSettings, SessionSnapshot, SessionStatus};
pub use transport::mqtt::MqttClient;
