//! Testing utilities and mock implementations
//!
//! Lets the session manager, dispatcher and mailbox handler be exercised
//! without an MQTT broker.

pub mod mocks;

pub use mocks::*;
