//! MQTT transport implementation backed by rumqttc
//!
//! This module separates pure functions from I/O operations for better
//! testability.
//!
//! # Architecture
//!
//! - [`acks`] - Matching broker acknowledgements to pending requests
//! - [`connection`] - Pure option building, QoS mapping and URL redaction
//! - [`events`] - Pure routing of rumqttc events into transport events
//! - [`client`] - Impure I/O: client/event-loop ownership and polling
//!
//! # Usage
//!
//! ```rust,no_run
//! use service_messaging::config::ClientConfig;
//! use service_messaging::transport::mqtt::MqttTransport;
//!
//! let config = ClientConfig::new("orders", "mqtt://localhost:1883");
//! let transport = MqttTransport::new(config.resolve_client_id(), config)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod acks;
pub mod client;
pub mod connection;
pub mod events;

// Re-export public types for convenience
pub use acks::{AckResult, PendingAcks, RequestKind};
pub use client::MqttTransport;
pub use connection::{configure_mqtt_options, redact_broker_url, to_mqtt_qos};
pub use events::{route_mqtt_event, EventRoute};
