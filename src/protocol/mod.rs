//! Topic and message primitives shared by the client and transports
//!
//! [`topics`] holds the wildcard matcher and validation rules, [`messages`]
//! the QoS levels and the inbound/delivered message shapes.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
