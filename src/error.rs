//! Error types for messaging client operations
//!
//! Only connection failures of the first `connect()`, not-connected
//! preconditions, input validation and in-session request failures reach the
//! caller. Handler failures, payload decode failures and transport errors
//! during an established session are logged and absorbed by the client.

use crate::client::ConnectionState;
use crate::config::ConfigError;
use crate::protocol::TopicError;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for messaging client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection failed after {attempts} attempt(s): {reason}")]
    ConnectionFailed { attempts: u32, reason: String },

    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },

    #[error("Publishing to '{topic}' failed")]
    PublishFailed {
        topic: String,
        #[source]
        source: TransportError,
    },

    #[error("Subscribing to '{pattern}' failed")]
    SubscriptionFailed {
        pattern: String,
        #[source]
        source: TransportError,
    },

    #[error("Unsubscribing from '{pattern}' failed")]
    UnsubscribeFailed {
        pattern: String,
        #[source]
        source: TransportError,
    },

    #[error("Serialization error")]
    SerializationError(#[source] serde_json::Error),

    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),
}

impl ClientError {
    /// Create connection failure error
    pub fn connection_failed<S: Into<String>>(attempts: u32, reason: S) -> Self {
        Self::ConnectionFailed {
            attempts,
            reason: reason.into(),
        }
    }

    /// Create not-connected error for the given state
    pub fn not_connected(state: ConnectionState) -> Self {
        Self::NotConnected { state }
    }

    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected { .. })
    }

    pub fn is_connection_failed(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. })
    }
}

/// Result type for messaging client operations
pub type ClientResult<T> = Result<T, ClientError>;
