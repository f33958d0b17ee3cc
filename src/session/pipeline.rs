//! Publish and intake decisions
//!
//! Pure functions deciding what happens to an outbound send request and an
//! inbound delivery. The session actor applies the outcome to the store,
//! the connection and the metrics.

use super::state::SessionStatus;
use crate::protocol::{decode, ChatMessage, DecodeError};

/// Why a send request produced no publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    NotConnected(SessionStatus),
    BlankText,
}

/// Build the message for a send request
pub fn prepare_outbound(
    status: SessionStatus,
    identity: &str,
    text: &str,
) -> Result<ChatMessage, SendRejection> {
    if status != SessionStatus::Connected {
        return Err(SendRejection::NotConnected(status));
    }
    if text.trim().is_empty() {
        return Err(SendRejection::BlankText);
    }
    Ok(ChatMessage::compose(identity, text))
}

/// Why an inbound delivery was dropped without decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    ForeignTopic(String),
    NotConnected(SessionStatus),
}

/// What to do with one inbound delivery
#[derive(Debug, Clone, PartialEq)]
pub enum IntakeOutcome {
    /// Append to the log
    Append(ChatMessage),
    /// Broker echo of a message already inserted on send
    LocalEcho(String),
    Ignored(IgnoreReason),
    Rejected(DecodeError),
}

/// Classify a delivery. `is_local_echo` reports whether a message id was
/// inserted on send and is still waiting for its broker echo; any other
/// delivery is appended, repeated ids included.
pub fn process_delivery(
    status: SessionStatus,
    chat_topic: &str,
    identity: &str,
    topic: &str,
    payload: &[u8],
    is_local_echo: impl Fn(&str) -> bool,
) -> IntakeOutcome {
    if topic != chat_topic {
        return IntakeOutcome::Ignored(IgnoreReason::ForeignTopic(topic.to_string()));
    }
    if status != SessionStatus::Connected {
        return IntakeOutcome::Ignored(IgnoreReason::NotConnected(status));
    }

    match decode(payload) {
        Ok(message) if is_local_echo(message.id()) => {
            IntakeOutcome::LocalEcho(message.id().to_string())
        }
        Ok(message) => IntakeOutcome::Append(message.tagged_for(identity)),
        Err(e) => IntakeOutcome::Rejected(e),
    }
}
