//! Inbound message dispatch
//!
//! [`CommandDispatcher`] looks up every registry binding whose filter matches
//! a message's topic and invokes each handler once, in registration order.
//! Nothing a handler does can stop the dispatcher: failures become status
//! events and dispatch moves on.

pub mod handler;
pub mod publisher;

pub use handler::{ChannelHandler, LoggingHandler, MessageHandler};
pub use publisher::Publisher;

use crate::error::LinkError;
use crate::protocol::{validate_topic_name, Message};
use crate::registry::SubscriptionRegistry;
use crate::session::{StatusEvent, StatusReporter};
use tokio::sync::mpsc;
use tracing::{info, warn, Instrument};

/// Result of dispatching one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// At least one binding matched
    Delivered { handled: usize, failed: usize },
    /// No binding matched; the message was logged and dropped
    Unmatched,
    /// The message was invalid and dropped
    Rejected,
}

#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    registry: SubscriptionRegistry,
    publisher: Publisher,
    status: StatusReporter,
}

impl CommandDispatcher {
    pub fn new(registry: SubscriptionRegistry, publisher: Publisher, status: StatusReporter) -> Self {
        Self {
            registry,
            publisher,
            status,
        }
    }

    pub async fn on_message(&self, message: Message) -> DispatchOutcome {
        if let Err(e) = validate_topic_name(&message.topic) {
            self.status.report(StatusEvent::MessageDropped {
                topic: message.topic.clone(),
                error: LinkError::protocol(e.to_string()),
            });
            return DispatchOutcome::Rejected;
        }

        let bindings = self.registry.matching(&message.topic).await;
        if bindings.is_empty() {
            warn!(topic = %message.topic, "No handler for message, dropping");
            return DispatchOutcome::Unmatched;
        }

        let mut failed = 0;
        for binding in &bindings {
            let span = crate::dispatch_span!(
                topic = %message.topic,
                filter = %binding.filter,
                handler = binding.handler.name()
            );
            let result = binding
                .handler
                .handle(&message, &self.publisher)
                .instrument(span)
                .await;
            if let Err(error) = result {
                failed += 1;
                self.status.report(StatusEvent::HandlerFailed {
                    filter: binding.filter.to_string(),
                    topic: message.topic.clone(),
                    error,
                });
            }
        }

        DispatchOutcome::Delivered {
            handled: bindings.len() - failed,
            failed,
        }
    }

    /// Dispatch everything arriving on `rx` until the sending side closes
    pub async fn run(self, mut rx: mpsc::Receiver<Message>) {
        while let Some(message) = rx.recv().await {
            self.on_message(message).await;
        }
        info!("Dispatcher stopped");
    }
}
