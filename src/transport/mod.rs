//! Transport layer
//!
//! A [`Transport`] opens one broker session at a time and hands back a
//! [`Link`]: a client half for outbound operations and an event half that
//! yields inbound traffic until the session drops. The connection manager
//! owns retry and subscription replay, so transports never reconnect on
//! their own.

use crate::config::BrokerConfig;
use crate::error::LinkError;
use crate::protocol::{Message, QoS};
use async_trait::async_trait;
use std::sync::Arc;

pub mod mqtt;

pub use mqtt::MqttTransport;

/// Opens broker sessions
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish a session; resolves once the broker acknowledged it
    async fn connect(&self, config: &BrokerConfig) -> Result<Link, LinkError>;
}

/// Outbound half of an established session
#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), LinkError>;

    async fn unsubscribe(&self, filter: &str) -> Result<(), LinkError>;

    async fn publish(&self, message: &Message) -> Result<(), LinkError>;

    async fn disconnect(&self) -> Result<(), LinkError>;
}

/// Inbound half of an established session
#[async_trait]
pub trait TransportEvents: Send {
    /// Next inbound event; an `Err` means the session is gone
    async fn next_event(&mut self) -> Result<TransportEvent, LinkError>;
}

/// Inbound traffic surfaced by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Application message on a subscribed topic
    Message(Message),
    /// Broker refused a subscription it had been asked for
    SubscriptionRejected { filter: String, reason: String },
    /// Inbound packet that could not be turned into a message
    Malformed { topic: String, reason: String },
}

/// A live broker session
pub struct Link {
    pub client: Arc<dyn TransportClient>,
    pub events: Box<dyn TransportEvents>,
}

impl Link {
    pub fn new(client: Arc<dyn TransportClient>, events: Box<dyn TransportEvents>) -> Self {
        Self { client, events }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}
