//! Pure reconnection policy
//!
//! Bounded retries with a fixed delay. The initial attempt is not counted:
//! with `max_attempts = 2` the client tries three times in total.

use crate::config::ConnectionSection;
use std::time::Duration;

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Fixed delay before each retry
    pub reconnect_period: Duration,
    /// Time allowed for a single attempt to reach `Connected`
    pub connect_timeout: Duration,
    /// Retries after the initial attempt
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ConnectionSection::default())
    }
}

impl From<&ConnectionSection> for ReconnectPolicy {
    fn from(section: &ConnectionSection) -> Self {
        Self {
            reconnect_period: section.reconnect_period(),
            connect_timeout: section.connect_timeout(),
            max_attempts: section.max_reconnect_attempts,
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with retry number `attempt` after `delay`
    Proceed { attempt: u32, delay: Duration },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
    /// Abort reconnection - max attempts exceeded
    AbortMaxAttemptsExceeded,
}

impl ReconnectPolicy {
    /// Determine if reconnection should be attempted (pure function)
    pub fn decide(&self, retries_so_far: u32, shutdown_requested: bool) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }
        if retries_so_far >= self.max_attempts {
            return ReconnectionDecision::AbortMaxAttemptsExceeded;
        }
        ReconnectionDecision::Proceed {
            attempt: retries_so_far + 1,
            delay: self.reconnect_period,
        }
    }

    /// Initial attempt plus retries
    pub fn total_attempts(&self) -> u32 {
        self.max_attempts.saturating_add(1)
    }
}
