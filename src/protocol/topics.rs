//! Chat topic and display-name validation
//!
//! All chat traffic flows over a single topic. The same topic is used for
//! publishing and subscribing, so it must be a concrete topic name (no
//! wildcards).

use thiserror::Error;

/// Well-known topic carrying every chat message
pub const CHAT_TOPIC: &str = "chat/messages";

/// Maximum encoded length of an MQTT topic name
const MAX_TOPIC_LEN: usize = 65_535;

pub fn validate_topic(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() {
        return Err(ValidationError::EmptyTopic);
    }

    if topic.len() > MAX_TOPIC_LEN {
        return Err(ValidationError::TopicTooLong(topic.len()));
    }

    for ch in topic.chars() {
        if ch == '+' || ch == '#' {
            return Err(ValidationError::WildcardInTopic(ch));
        }
        if ch == '\0' {
            return Err(ValidationError::NulInTopic);
        }
    }

    Ok(())
}

/// Validate a local display name before it becomes the session identity
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyDisplayName);
    }

    if let Some(ch) = name.chars().find(|c| c.is_control()) {
        return Err(ValidationError::InvalidDisplayNameChar(ch));
    }

    Ok(())
}

/// Validation errors for topics and identities
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Topic cannot be empty")]
    EmptyTopic,
    #[error("Topic is {0} bytes, above the MQTT limit")]
    TopicTooLong(usize),
    #[error("Topic contains wildcard '{0}' and cannot be published to")]
    WildcardInTopic(char),
    #[error("Topic contains a NUL character")]
    NulInTopic,
    #[error("Display name cannot be empty")]
    EmptyDisplayName,
    #[error("Display name contains invalid character: {0:?}")]
    InvalidDisplayNameChar(char),
}
