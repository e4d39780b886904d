//! Message types exchanged with the broker
//!
//! Outbound payloads are any `Serialize` value encoded as JSON text. Inbound
//! payloads are decoded as JSON when possible and otherwise delivered as the
//! raw bytes that arrived.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Quality of service level, passed through to the transport unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// Level 0
    #[default]
    AtMostOnce,
    /// Level 1
    AtLeastOnce,
    /// Level 2
    ExactlyOnce,
}

#[derive(Debug, Error, PartialEq)]
#[error("Invalid QoS level {0}, expected 0, 1 or 2")]
pub struct InvalidQos(pub u8);

impl TryFrom<u8> for QoS {
    type Error = InvalidQos;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(InvalidQos(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// A message as received from the transport, before dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

/// Decoded inbound payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Payload parsed as JSON
    Json(Value),
    /// Payload that failed JSON decoding, delivered as-is
    Raw(Bytes),
}

impl Payload {
    /// Decode wire bytes, falling back to [`Payload::Raw`] on invalid JSON
    pub fn decode(bytes: &Bytes) -> Self {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Raw(bytes.clone()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }

    /// Raw payloads that are valid UTF-8, as text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Json(Value::String(s)) => Some(s.as_str()),
            Payload::Json(_) => None,
            Payload::Raw(bytes) => std::str::from_utf8(bytes).ok(),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Payload::Raw(_))
    }

    /// Deserialize into a concrete type
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            Payload::Json(value) => T::deserialize(value),
            Payload::Raw(bytes) => serde_json::from_slice(bytes),
        }
    }
}

/// A message delivered to a handler
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Concrete topic the message was published on
    pub topic: String,
    /// Pattern the receiving handler was registered under
    pub pattern: String,
    pub payload: Payload,
    pub received_at: DateTime<Utc>,
}

/// Payload delivered to a typed handler
///
/// Payloads that do not decode into `T` are still delivered, as
/// [`Received::Opaque`].
#[derive(Debug, Clone, PartialEq)]
pub enum Received<T> {
    Typed(T),
    Opaque(Payload),
}

impl<T: DeserializeOwned> Received<T> {
    pub fn from_payload(payload: Payload) -> Self {
        match payload.deserialize::<T>() {
            Ok(value) => Received::Typed(value),
            Err(_) => Received::Opaque(payload),
        }
    }
}

impl<T> Received<T> {
    pub fn typed(self) -> Option<T> {
        match self {
            Received::Typed(value) => Some(value),
            Received::Opaque(_) => None,
        }
    }
}
