//! Configuration for the messaging client
//!
//! Loaded from a TOML file with `[service]`, `[broker]` and `[connection]`
//! sections. Every field except the service name and broker URL has a
//! default. Credentials are never stored in the file, only the names of the
//! environment variables holding them.

use crate::protocol::QoS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Main client configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub service: ServiceSection,
    pub broker: BrokerSection,
    #[serde(default)]
    pub connection: ConnectionSection,
}

/// Service identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSection {
    /// Logical service name (must match [a-zA-Z0-9._-]+); prefixes generated client IDs
    pub name: String,
}

/// Broker endpoint section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL, `mqtt://host:port` or `mqtts://host:port`
    pub url: String,
    /// Fixed client identifier; generated as `{service}-{uuid}` when absent
    pub client_id: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Keep-alive interval in seconds (default: 60)
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

/// Connection lifecycle tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSection {
    /// Fixed delay between reconnection attempts (default: 5000)
    #[serde(default = "default_reconnect_period_ms")]
    pub reconnect_period_ms: u64,
    /// Time allowed for a single connection attempt (default: 30000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Retries after the initial attempt before giving up (default: 2)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// QoS used by publish/subscribe when the caller does not pass one
    #[serde(default)]
    pub default_qos: QoS,
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_reconnect_period_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    30000
}

fn default_max_reconnect_attempts() -> u32 {
    2
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            reconnect_period_ms: default_reconnect_period_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            default_qos: QoS::default(),
        }
    }
}

impl ConnectionSection {
    pub fn reconnect_period(&self) -> Duration {
        Duration::from_millis(self.reconnect_period_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid service name: {0}")]
    InvalidServiceName(String),
    #[error("Invalid broker URL '{url}': {reason}")]
    InvalidBrokerUrl { url: String, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Build a configuration with default connection settings
    pub fn new(service_name: impl Into<String>, broker_url: impl Into<String>) -> Self {
        Self {
            service: ServiceSection {
                name: service_name.into(),
            },
            broker: BrokerSection {
                url: broker_url.into(),
                client_id: None,
                username_env: None,
                password_env: None,
                keep_alive_secs: default_keep_alive_secs(),
            },
            connection: ConnectionSection::default(),
        }
    }

    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field formats and value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_service_name(&self.service.name)?;
        parse_broker_url(&self.broker.url)?;

        if let Some(client_id) = &self.broker.client_id {
            if client_id.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "broker.client_id cannot be empty".to_string(),
                ));
            }
        }
        if self.broker.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(format!(
                "broker.keep_alive_secs must be at least 5, got {}",
                self.broker.keep_alive_secs
            )));
        }
        if self.connection.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "connection.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Configured client ID, or a fresh `{service}-{uuid}` identifier
    pub fn resolve_client_id(&self) -> String {
        match &self.broker.client_id {
            Some(client_id) => client_id.clone(),
            None => generate_client_id(&self.service.name),
        }
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get broker username from environment variable
    pub fn get_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.username_env.as_ref())
    }

    /// Get broker password from environment variable
    pub fn get_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.password_env.as_ref())
    }
}

/// Generate a client identifier unique across instances of the same service
pub fn generate_client_id(service_name: &str) -> String {
    format!("{service_name}-{}", Uuid::new_v4())
}

/// Parse a broker URL, accepting only `mqtt` and `mqtts` schemes with a host
pub fn parse_broker_url(broker_url: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidBrokerUrl {
        url: broker_url.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(broker_url).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "mqtt" | "mqtts") {
        return Err(invalid("scheme must be mqtt or mqtts"));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(url)
}

/// Validate service name format
fn validate_service_name(name: &str) -> Result<(), ConfigError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if name.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidServiceName(format!(
            "Service name '{name}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[service]
name = "orders"

[broker]
url = "mqtts://broker.internal:8883"
client_id = "orders-primary"
username_env = "MQTT_USERNAME"
password_env = "MQTT_PASSWORD"
keep_alive_secs = 30

[connection]
reconnect_period_ms = 3000
connect_timeout_ms = 60000
max_reconnect_attempts = 5
default_qos = 1
"#;

        let config = ClientConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.service.name, "orders");
        assert_eq!(config.broker.url, "mqtts://broker.internal:8883");
        assert_eq!(config.broker.keep_alive_secs, 30);
        assert_eq!(config.connection.reconnect_period(), Duration::from_secs(3));
        assert_eq!(config.connection.connect_timeout(), Duration::from_secs(60));
        assert_eq!(config.connection.max_reconnect_attempts, 5);
        assert_eq!(config.connection.default_qos, QoS::AtLeastOnce);
        assert_eq!(config.resolve_client_id(), "orders-primary");
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let toml_content = r#"
[service]
name = "billing"

[broker]
url = "mqtt://localhost:1883"
"#;

        let config = ClientConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.broker.client_id, None);
        assert_eq!(config.broker.keep_alive_secs, 60);
        assert_eq!(config.connection, ConnectionSection::default());
        assert_eq!(config.connection.reconnect_period_ms, 5000);
        assert_eq!(config.connection.connect_timeout_ms, 30000);
        assert_eq!(config.connection.max_reconnect_attempts, 2);
        assert_eq!(config.connection.default_qos, QoS::AtMostOnce);
    }

    #[test]
    fn test_generated_client_id_has_service_prefix() {
        let config = ClientConfig::new("billing", "mqtt://localhost:1883");
        let first = config.resolve_client_id();
        let second = config.resolve_client_id();

        assert!(first.starts_with("billing-"));
        assert_ne!(first, second, "generated IDs must not collide");
        assert!(Uuid::parse_str(first.trim_start_matches("billing-")).is_ok());
    }

    #[test]
    fn test_invalid_qos_rejected() {
        let toml_content = r#"
[service]
name = "billing"

[broker]
url = "mqtt://localhost:1883"

[connection]
default_qos = 3
"#;

        let result = ClientConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_invalid_service_name() {
        assert!(validate_service_name("invalid@service").is_err());
        assert!(validate_service_name("").is_err());
        assert!(validate_service_name("valid-service_1.0").is_ok());
    }

    #[test]
    fn test_parse_broker_url() {
        assert!(parse_broker_url("mqtt://localhost:1883").is_ok());
        assert!(parse_broker_url("mqtts://broker.example.com").is_ok());
        assert!(matches!(
            parse_broker_url("http://localhost"),
            Err(ConfigError::InvalidBrokerUrl { .. })
        ));
        assert!(matches!(
            parse_broker_url("invalid-url"),
            Err(ConfigError::InvalidBrokerUrl { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClientConfig::new("svc", "mqtt://localhost:1883");
        assert!(config.validate().is_ok());

        config.broker.keep_alive_secs = 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));

        config.broker.keep_alive_secs = 60;
        config.connection.connect_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));

        config.connection.connect_timeout_ms = 1000;
        config.broker.client_id = Some(String::new());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_credentials_from_environment() {
        let mut config = ClientConfig::new("svc", "mqtt://localhost:1883");
        config.broker.username_env = Some("SERVICE_MESSAGING_TEST_USER".to_string());
        config.broker.password_env = Some("SERVICE_MESSAGING_TEST_PASS_UNSET".to_string());

        unsafe {
            std::env::set_var("SERVICE_MESSAGING_TEST_USER", "svc-user");
        }
        assert_eq!(config.get_username(), Some("svc-user".to_string()));
        assert_eq!(config.get_password(), None);
        unsafe {
            std::env::remove_var("SERVICE_MESSAGING_TEST_USER");
        }
    }
}
