//! Configuration for the chat client
//!
//! Loaded from a TOML file. Broker credentials are never stored in the file:
//! the `[mqtt]` section names the environment variables holding them, and
//! they are resolved at runtime.

use crate::protocol::topics::{validate_display_name, validate_topic, CHAT_TOPIC};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatConfig {
    #[serde(default)]
    pub chat: ChatSection,
    pub mqtt: MqttSection,
}

/// Chat section - local identity and presentation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChatSection {
    /// Display name used as `sender`; a random one is generated when absent
    pub identity: Option<String>,
    /// Language of the human-readable status text
    #[serde(default)]
    pub language: StatusLanguage,
    /// Insert sent messages into the log before the broker echoes them back
    #[serde(default)]
    pub local_echo: bool,
}

/// MQTT section - broker connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL: mqtt://, tcp://, mqtts:// or ssl://
    pub broker_url: String,
    /// Topic carrying all chat traffic
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Prefix for the per-session client identifier
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Seconds to wait for the broker to acknowledge a connect
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_topic() -> String {
    CHAT_TOPIC.to_string()
}

fn default_client_id_prefix() -> String {
    "mqttchat".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_keep_alive() -> u64 {
    20
}

/// Language used for status labels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum StatusLanguage {
    #[default]
    #[serde(rename = "en")]
    English,
    #[serde(rename = "es")]
    Spanish,
}

impl StatusLanguage {
    /// Random display name in the style `User_123`
    pub fn random_identity(&self) -> String {
        let n = uuid::Uuid::new_v4().as_u128() % 1000;
        match self {
            StatusLanguage::English => format!("User_{n}"),
            StatusLanguage::Spanish => format!("Usuario_{n}"),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ChatConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ChatConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration pointing at the given broker
    pub fn with_broker(broker_url: impl Into<String>) -> Self {
        Self {
            chat: ChatSection::default(),
            mqtt: MqttSection {
                broker_url: broker_url.into(),
                topic: default_topic(),
                username_env: None,
                password_env: None,
                client_id_prefix: default_client_id_prefix(),
                connect_timeout_secs: default_connect_timeout(),
                keep_alive_secs: default_keep_alive(),
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_broker_url(&self.mqtt.broker_url)?;

        validate_topic(&self.mqtt.topic)
            .map_err(|e| ConfigError::InvalidConfig(format!("mqtt.topic: {e}")))?;

        if let Some(identity) = &self.chat.identity {
            validate_display_name(identity)
                .map_err(|e| ConfigError::InvalidConfig(format!("chat.identity: {e}")))?;
        }

        if self.mqtt.client_id_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.client_id_prefix cannot be empty".to_string(),
            ));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.keep_alive_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.password_env.as_ref())
    }

    /// Configured identity, or a freshly generated one
    pub fn identity_or_random(&self) -> String {
        self.chat
            .identity
            .clone()
            .unwrap_or_else(|| self.chat.language.random_identity())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.mqtt.connect_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.mqtt.keep_alive_secs)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[chat]
identity = "Alice"

[mqtt]
broker_url = "mqtt://localhost:1883"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Schemes accepted for broker URLs; `ssl` and `mqtts` select TLS
pub const BROKER_SCHEMES: [&str; 4] = ["mqtt", "tcp", "mqtts", "ssl"];

pub fn validate_broker_url(broker_url: &str) -> Result<(), ConfigError> {
    let url =
        Url::parse(broker_url).map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

    if !BROKER_SCHEMES.contains(&url.scheme()) {
        return Err(ConfigError::InvalidBrokerUrl(format!(
            "{broker_url} (unsupported scheme '{}')",
            url.scheme()
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidBrokerUrl(format!(
            "{broker_url} (missing host)"
        )));
    }

    Ok(())
}
