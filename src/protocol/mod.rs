//! Wire-level types shared by the transport, registry and dispatcher
//!
//! Messages, QoS levels and MQTT topic rules.

pub mod message;
pub mod topics;

pub use message::*;
pub use topics::*;
