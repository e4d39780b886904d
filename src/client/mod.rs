//! Messaging client core
//!
//! # Architecture
//!
//! - [`state`] - Connection states, lifecycle events and transition logging
//! - [`reconnect`] - Pure retry policy
//! - [`connection`] - Connection manager and its supervisor task
//! - [`registry`] - Handler registry and sequential dispatch
//! - [`publisher`] - Outbound publishing
//! - [`messaging`] - The [`MessagingClient`] façade

pub mod connection;
pub mod messaging;
pub mod publisher;
pub mod reconnect;
pub mod registry;
pub mod state;

pub use connection::ConnectionManager;
pub use messaging::MessagingClient;
pub use publisher::PublishGateway;
pub use reconnect::{ReconnectPolicy, ReconnectionDecision};
pub use registry::{
    DispatchReport, HandlerError, HandlerId, HandlerRegistry, HandlerResult, MessageHandler,
    Registration,
};
pub use state::{ConnectionEvent, ConnectionState, ConnectionStats};
