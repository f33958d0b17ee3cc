//! Pure connection configuration for the MQTT client
//!
//! Broker URL parsing and translation of [`ConnectOptions`] into rumqttc
//! options. Nothing here performs I/O.

use crate::transport::ConnectOptions;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use thiserror::Error;
use url::Url;

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected")]
    NotConnected,
}

/// Host, port and security of a broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse `mqtt://`, `tcp://`, `mqtts://` or `ssl://` broker URLs.
/// TLS schemes default to port 8883, plain ones to 1883.
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerEndpoint, MqttError> {
    let url =
        Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtts" | "ssl" => true,
        "mqtt" | "tcp" => false,
        _ => return Err(MqttError::InvalidBrokerUrl(broker_url.to_string())),
    };

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerEndpoint {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Build rumqttc options for one connect attempt
pub fn configure_mqtt_options(options: &ConnectOptions) -> Result<MqttOptions, MqttError> {
    let endpoint = parse_broker_url(&options.broker_url)?;

    let mut mqtt_options = MqttOptions::new(&options.client_id, endpoint.host, endpoint.port);

    if endpoint.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(credentials) = &options.credentials {
        mqtt_options.set_credentials(&credentials.username, &credentials.password);
    }

    mqtt_options.set_keep_alive(options.keep_alive);

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Credentials;
    use std::time::Duration;

    fn test_connect_options(broker_url: &str) -> ConnectOptions {
        ConnectOptions {
            broker_url: broker_url.to_string(),
            client_id: "mqttchat-test".to_string(),
            credentials: Some(Credentials::new("alice", "secret")),
            keep_alive: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_parse_plain_url() {
        let endpoint = parse_broker_url("mqtt://localhost:1883").unwrap();
        assert_eq!(endpoint.host, "localhost");
        assert_eq!(endpoint.port, 1883);
        assert!(!endpoint.tls);
    }

    #[test]
    fn test_parse_tls_urls() {
        let endpoint = parse_broker_url("ssl://broker.example.com:8883").unwrap();
        assert!(endpoint.tls);
        assert_eq!(endpoint.port, 8883);

        let endpoint = parse_broker_url("mqtts://broker.example.com").unwrap();
        assert!(endpoint.tls);
        assert_eq!(endpoint.port, 8883);
    }

    #[test]
    fn test_default_plain_port() {
        let endpoint = parse_broker_url("tcp://10.1.2.3").unwrap();
        assert_eq!(endpoint.port, 1883);
        assert!(!endpoint.tls);
    }

    #[test]
    fn test_invalid_broker_urls() {
        for url in ["invalid-url", "http://broker:80", "mqtt://", ""] {
            assert!(
                matches!(parse_broker_url(url), Err(MqttError::InvalidBrokerUrl(_))),
                "expected rejection of {url:?}"
            );
        }
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(&test_connect_options("mqtt://localhost:1883"));
        assert!(options.is_ok());
        let options = options.unwrap();
        assert_eq!(options.client_id(), "mqttchat-test");
        assert_eq!(options.keep_alive(), Duration::from_secs(20));
    }

    #[test]
    fn test_configure_tls_options() {
        let options = configure_mqtt_options(&test_connect_options("ssl://broker:8883"));
        assert!(options.is_ok());
    }

    #[test]
    fn test_configure_rejects_bad_url() {
        let result = configure_mqtt_options(&test_connect_options("not a url"));
        assert!(matches!(result, Err(MqttError::InvalidBrokerUrl(_))));
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::ConnectionFailed("test".to_string().into()),
            MqttError::PublishFailed("test".to_string().into()),
            MqttError::SubscriptionFailed("test".to_string().into()),
            MqttError::InvalidBrokerUrl("test".to_string()),
            MqttError::NotConnected,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
