//! Connection state, lifecycle events and transition logging

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

/// Connection lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state, `connect()` never called
    Disconnected,
    /// Waiting for the broker to acknowledge a session
    Connecting,
    /// Session established; publish/subscribe allowed
    Connected,
    /// Waiting out the delay before retry number `n`
    Reconnecting(u32),
    /// Shut down by `disconnect()` or after the retry budget ran out
    Closed,
}

impl ConnectionState {
    /// A lifecycle supervisor may still move the client out of this state
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting(_)
        )
    }
}

/// Lifecycle events broadcast to observers
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// State transition
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// An established or pending session ended with an error
    SessionLost { reason: String },
    /// Retry budget exhausted
    GaveUp { attempts: u32, reason: String },
}

/// Connection statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionStats {
    /// When the current session was established
    pub connected_since: Option<DateTime<Utc>>,
    /// Successful reconnections over the client's lifetime
    pub reconnect_count: u32,
    /// Sessions that ended with an error
    pub sessions_lost: u32,
}

/// Log connection state transition
pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
    match (from, to) {
        (ConnectionState::Connecting, ConnectionState::Connected) => {
            info!("Connection established");
        }
        (ConnectionState::Connected, ConnectionState::Reconnecting(attempt)) => {
            warn!(attempt, "Connection lost, reconnecting");
        }
        (ConnectionState::Connecting, ConnectionState::Reconnecting(attempt)) => {
            warn!(attempt, "Connection attempt failed, retrying");
        }
        (ConnectionState::Reconnecting(attempt), ConnectionState::Connecting) => {
            info!(attempt, "Starting reconnection attempt");
        }
        (ConnectionState::Connecting, ConnectionState::Closed)
        | (ConnectionState::Connected, ConnectionState::Closed)
        | (ConnectionState::Reconnecting(_), ConnectionState::Closed) => {
            info!("Connection closed");
        }
        (_, ConnectionState::Closed) => {
            tracing::debug!("Connection closed");
        }
        _ => {
            info!("Connection state: {:?} -> {:?}", from, to);
        }
    }
}

/// Log a terminal give-up decision
pub fn log_gave_up(attempts: u32, reason: &str, first_connect: bool) {
    if first_connect {
        error!(attempts, reason, "Could not connect to broker, giving up");
    } else {
        error!(
            attempts,
            reason, "Reconnection attempts exhausted, client is now closed"
        );
    }
}
