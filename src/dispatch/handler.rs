//! Message handler trait and the stock handlers

use super::publisher::Publisher;
use crate::error::{LinkError, LinkResult};
use crate::protocol::Message;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

/// Receives messages routed to a subscription
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one message; may publish back through `publisher`
    async fn handle(&self, message: &Message, publisher: &Publisher) -> LinkResult<()>;

    /// Name used in logs
    fn name(&self) -> &str {
        "handler"
    }
}

/// Logs every message it receives
#[derive(Debug, Clone, Default)]
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, message: &Message, _publisher: &Publisher) -> LinkResult<()> {
        match message.payload_str() {
            Some(text) => info!(
                topic = %message.topic,
                qos = %message.qos,
                retain = message.retain,
                payload = %text,
                "Message received"
            ),
            None => info!(
                topic = %message.topic,
                qos = %message.qos,
                retain = message.retain,
                bytes = message.payload.len(),
                "Binary message received"
            ),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// Forwards every message into a channel
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    sender: mpsc::Sender<Message>,
}

impl ChannelHandler {
    pub fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl MessageHandler for ChannelHandler {
    async fn handle(&self, message: &Message, _publisher: &Publisher) -> LinkResult<()> {
        self.sender
            .send(message.clone())
            .await
            .map_err(|_| LinkError::handler("receiving side of the channel is closed"))
    }

    fn name(&self) -> &str {
        "channel"
    }
}
