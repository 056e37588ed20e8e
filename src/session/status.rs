//! Status reporting
//!
//! Every state change and every error the session layer runs into goes to
//! the tracing log and onto a broadcast channel. Subscribers that lag simply
//! miss events; the log keeps the full record.

use super::state::SessionState;
use crate::error::LinkError;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events buffered per subscriber before it starts lagging
pub const STATUS_CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// A connection attempt failed; attempt 0 is the initial `connect`
    ConnectFailed { attempt: u32, error: LinkError },
    /// An established session dropped
    SessionLost { error: LinkError },
    SubscriptionFailed { filter: String, error: LinkError },
    MessageDropped { topic: String, error: LinkError },
    HandlerFailed {
        filter: String,
        topic: String,
        error: LinkError,
    },
    RetriesExhausted { attempts: u32 },
}

impl StatusEvent {
    /// The error carried by this event, if any
    pub fn error(&self) -> Option<&LinkError> {
        match self {
            StatusEvent::ConnectFailed { error, .. }
            | StatusEvent::SessionLost { error }
            | StatusEvent::SubscriptionFailed { error, .. }
            | StatusEvent::MessageDropped { error, .. }
            | StatusEvent::HandlerFailed { error, .. } => Some(error),
            StatusEvent::StateChanged { .. } | StatusEvent::RetriesExhausted { .. } => None,
        }
    }

    /// One-line description with secrets redacted
    pub fn describe(&self) -> String {
        match self {
            StatusEvent::StateChanged { from, to } => format!("state {from:?} -> {to:?}"),
            StatusEvent::ConnectFailed { attempt, error } => {
                format!("connect attempt {attempt} failed: {}", error.redacted())
            }
            StatusEvent::SessionLost { error } => format!("session lost: {}", error.redacted()),
            StatusEvent::SubscriptionFailed { filter, error } => {
                format!("subscription '{filter}' failed: {}", error.redacted())
            }
            StatusEvent::MessageDropped { topic, error } => {
                format!("message on '{topic}' dropped: {}", error.redacted())
            }
            StatusEvent::HandlerFailed {
                filter,
                topic,
                error,
            } => format!(
                "handler for '{filter}' failed on '{topic}': {}",
                error.redacted()
            ),
            StatusEvent::RetriesExhausted { attempts } => {
                format!("gave up after {attempts} reconnect attempts")
            }
        }
    }
}

/// Fan-out of status events to the log and to subscribers
#[derive(Debug, Clone)]
pub struct StatusReporter {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusReporter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn report(&self, event: StatusEvent) {
        let description = event.describe();
        match &event {
            StatusEvent::StateChanged { .. } => debug!(target: "swiftmail::status", "{}", description),
            StatusEvent::ConnectFailed { .. }
            | StatusEvent::SessionLost { .. }
            | StatusEvent::SubscriptionFailed { .. } => {
                warn!(target: "swiftmail::status", "{}", description)
            }
            StatusEvent::MessageDropped { .. } => info!(target: "swiftmail::status", "{}", description),
            StatusEvent::HandlerFailed { .. } | StatusEvent::RetriesExhausted { .. } => {
                error!(target: "swiftmail::status", "{}", description)
            }
        }

        // No subscribers is fine; the log line above is the record
        let _ = self.tx.send(event);
    }
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}
