//! Pure connection configuration for the MQTT transport
//!
//! This module contains pure functions that turn a [`ClientConfig`] into
//! rumqttc options, plus QoS mapping and log-safe URL rendering.

use crate::config::{parse_broker_url, ClientConfig, ConfigError};
use crate::protocol::QoS;
use rumqttc::v5::{mqttbytes::QoS as MqttQoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use url::Url;

/// Largest packet accepted from or sent to the broker
pub const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Pure function to configure MQTT options from config
pub fn configure_mqtt_options(
    client_id: &str,
    config: &ClientConfig,
) -> Result<MqttOptions, ConfigError> {
    let url = parse_broker_url(&config.broker.url)?;

    let host = url
        .host_str()
        .ok_or_else(|| ConfigError::InvalidBrokerUrl {
            url: config.broker.url.clone(),
            reason: "missing host".to_string(),
        })?
        .to_string();
    let port = url.port().unwrap_or(default_port(url.scheme()));

    let mut mqtt_options = MqttOptions::new(client_id, host, port);

    // mqtts:// needs TLS with the platform roots
    if url.scheme() == "mqtts" {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config.get_username() {
        let password = config.get_password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.broker.keep_alive_secs));
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    Ok(mqtt_options)
}

/// Default broker port for a URL scheme
pub fn default_port(scheme: &str) -> u16 {
    if scheme == "mqtts" {
        8883
    } else {
        1883
    }
}

/// Map crate QoS onto the rumqttc representation
pub fn to_mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
    }
}

/// Broker URL with any embedded password masked, for logging
pub fn redact_broker_url(broker_url: &str) -> String {
    match Url::parse(broker_url) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => broker_url.to_string(),
    }
}
