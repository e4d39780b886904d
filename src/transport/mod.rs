//! Transport layer for broker communication
//!
//! This module provides the minimal send/receive contract the client core
//! needs from a broker connection, plus the MQTT implementation.

use crate::protocol::{InboundMessage, QoS};
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

/// Events produced by an open transport session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker acknowledged the session
    Connected,
    /// Message received on a subscribed topic
    Message(InboundMessage),
    /// Transport or protocol error; the session is unusable afterwards
    Error(String),
    /// Session closed by the broker or the network
    Closed,
}

/// Transport-level failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Request rejected: {0}")]
    Request(String),
    #[error("No open session")]
    NoSession,
}

/// Transport trait for broker communication
///
/// Each call to [`Transport::open`] starts a fresh session and hands back the
/// receiving end of its event stream. Reconnection is driven by the caller:
/// a transport never retries on its own. The stream ending is equivalent to
/// [`TransportEvent::Closed`]. Requests resolve once the broker has
/// acknowledged them and fail with the broker's reason when it refuses.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start a new session, replacing any previous one
    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    /// Close the current session, if any
    async fn close(&self) -> Result<(), TransportError>;

    /// Publish an encoded payload
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS)
        -> Result<(), TransportError>;

    /// Subscribe to a topic pattern
    async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), TransportError>;

    /// Remove a topic pattern subscription
    async fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError>;
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttTransport;
