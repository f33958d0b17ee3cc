//! JSON codec for chat messages
//!
//! Encoding is infallible. Decoding separates payloads that are not text or
//! JSON at all ([`DecodeError::InvalidEncoding`]) from well-formed JSON that
//! does not describe a chat message ([`DecodeError::MalformedPayload`]).

use super::messages::{ChatMessage, WireMessage};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Malformed chat payload: {0}")]
    MalformedPayload(String),
    #[error("Payload is not valid UTF-8 JSON: {0}")]
    InvalidEncoding(String),
}

/// Encode a message into its wire bytes
pub fn encode(message: &ChatMessage) -> Vec<u8> {
    // Strings and an integer always serialize
    serde_json::to_vec(&WireMessage::from(message)).unwrap_or_default()
}

/// Decode wire bytes into a message with `is_own == false`
pub fn decode(payload: &[u8]) -> Result<ChatMessage, DecodeError> {
    let text =
        std::str::from_utf8(payload).map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?;

    if !value.is_object() {
        return Err(DecodeError::MalformedPayload(
            "expected a JSON object".to_string(),
        ));
    }

    let wire: WireMessage = serde_json::from_value(value)
        .map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;

    if wire.id.is_empty() {
        return Err(DecodeError::MalformedPayload("empty id".to_string()));
    }
    if wire.sender.is_empty() {
        return Err(DecodeError::MalformedPayload("empty sender".to_string()));
    }

    Ok(wire.into())
}
