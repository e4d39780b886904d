//! Service Messaging - MQTT client core for backend services
//!
//! A small publish/subscribe client with wildcard topic routing, isolated
//! handler dispatch and a bounded reconnection policy.
//!
//! # Overview
//!
//! - Topic matching with `+` and `#` wildcards
//! - Handler registry with deterministic, fault-isolated dispatch
//! - JSON payload decoding with raw fallback
//! - Connection manager with a fixed-delay, bounded retry state machine
//! - MQTT transport backed by rumqttc
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use service_messaging::client::{HandlerResult, MessagingClient};
//! use service_messaging::config::ClientConfig;
//! use service_messaging::protocol::Message;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let config = ClientConfig::new("orders", "mqtt://localhost:1883");
//! let client = MessagingClient::from_config(config)?;
//!
//! client
//!     .on_message("orders/+/created", |message: Message| async move {
//!         println!("{} -> {:?}", message.topic, message.payload);
//!         HandlerResult::Ok(())
//!     })
//!     .await?;
//!
//! client.connect().await?;
//! client.publish("orders/eu/created", &json!({"id": 42})).await?;
//! client.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

// Re-export commonly used types
pub use client::{ConnectionState, HandlerId, MessagingClient};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use protocol::{Message, Payload, QoS};
