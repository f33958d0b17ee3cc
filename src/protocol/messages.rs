//! Chat message types
//!
//! [`ChatMessage`] is the value stored in the session log. [`WireMessage`] is
//! its on-the-wire shape; the ownership flag is derived at receipt time and
//! never transmitted.

use chrono::{Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single chat message
///
/// Messages are immutable once constructed.
///
/// # Examples
/// ```
/// use mqttchat::protocol::ChatMessage;
///
/// let msg = ChatMessage::compose("Alice", "hi");
/// assert_eq!(msg.sender(), "Alice");
/// assert_eq!(msg.body(), "hi");
/// assert!(msg.is_own());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    id: String,
    sender: String,
    body: String,
    timestamp: i64,
    is_own: bool,
}

impl ChatMessage {
    /// Build a message received from the broker
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        body: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            body: body.into(),
            timestamp,
            is_own: false,
        }
    }

    /// Compose an outgoing message with a fresh id and the current time
    pub fn compose(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            body: body.into(),
            timestamp: Utc::now().timestamp_millis(),
            is_own: true,
        }
    }

    /// Copy of this message with `is_own` derived from the local identity
    pub fn tagged_for(self, identity: &str) -> Self {
        let is_own = self.sender == identity;
        Self { is_own, ..self }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Milliseconds since the Unix epoch, as stamped by the sender
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn is_own(&self) -> bool {
        self.is_own
    }

    /// Local wall-clock `HH:MM` label for the message timestamp
    pub fn time_label(&self) -> String {
        match Local.timestamp_millis_opt(self.timestamp).single() {
            Some(time) => time.format("%H:%M").to_string(),
            None => "--:--".to_string(),
        }
    }
}

/// Wire representation of a chat message
///
/// Every field is required. There is no version field: changing this shape
/// breaks every connected client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    pub id: String,
    pub sender: String,
    pub message: String,
    pub timestamp: i64,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            id: msg.id.clone(),
            sender: msg.sender.clone(),
            message: msg.body.clone(),
            timestamp: msg.timestamp,
        }
    }
}

impl From<WireMessage> for ChatMessage {
    fn from(wire: WireMessage) -> Self {
        ChatMessage::new(wire.id, wire.sender, wire.message, wire.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_generates_unique_ids() {
        let a = ChatMessage::compose("Alice", "one");
        let b = ChatMessage::compose("Alice", "one");
        assert_ne!(a.id(), b.id());
        assert!(Uuid::parse_str(a.id()).is_ok());
    }

    #[test]
    fn test_compose_timestamp_is_current() {
        let before = Utc::now().timestamp_millis();
        let msg = ChatMessage::compose("Alice", "hi");
        let after = Utc::now().timestamp_millis();
        assert!(msg.timestamp() >= before && msg.timestamp() <= after);
    }

    #[test]
    fn test_received_messages_start_foreign() {
        let msg = ChatMessage::new("1", "Bob", "hello", 1000);
        assert!(!msg.is_own());
    }

    #[test]
    fn test_tagged_for_identity() {
        let msg = ChatMessage::new("1", "Alice", "hi", 1000);
        assert!(msg.clone().tagged_for("Alice").is_own());
        assert!(!msg.tagged_for("Bob").is_own());
    }

    #[test]
    fn test_tagging_is_case_sensitive() {
        let msg = ChatMessage::new("1", "alice", "hi", 1000);
        assert!(!msg.tagged_for("Alice").is_own());
    }

    #[test]
    fn test_time_label_format() {
        let msg = ChatMessage::new("1", "Bob", "hello", 1_700_000_000_000);
        let label = msg.time_label();
        assert_eq!(label.len(), 5);
        assert_eq!(&label[2..3], ":");
    }

    #[test]
    fn test_wire_conversion_drops_ownership() {
        let msg = ChatMessage::new("1", "Alice", "hi", 42).tagged_for("Alice");
        let wire = WireMessage::from(&msg);
        assert_eq!(wire.message, "hi");
        let back = ChatMessage::from(wire);
        assert!(!back.is_own());
        assert_eq!(back.id(), "1");
    }
}
