//! Mock implementations for testing
//!
//! [`MockTransport`] plays the broker: connect outcomes are scripted, every
//! session gets its own [`RecordingClient`], and tests push messages, drops
//! and subscription rejections into the live session.

use crate::config::BrokerConfig;
use crate::dispatch::{MessageHandler, Publisher};
use crate::error::{LinkError, LinkResult};
use crate::protocol::{Message, QoS};
use crate::transport::{Link, Transport, TransportClient, TransportEvent, TransportEvents};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

type EventSender = mpsc::UnboundedSender<Result<TransportEvent, LinkError>>;

/// Transport client that records every call
#[derive(Debug, Default)]
pub struct RecordingClient {
    subscriptions: Mutex<Vec<(String, QoS)>>,
    unsubscriptions: Mutex<Vec<String>>,
    published: Mutex<Vec<Message>>,
    failing_filters: Mutex<HashSet<String>>,
    closed: Mutex<bool>,
    disconnects: Mutex<u32>,
    events_dropped: AtomicBool,
    disconnected_while_streaming: AtomicBool,
}

impl RecordingClient {
    pub async fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn subscribed_filters(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .await
            .iter()
            .map(|(filter, _)| filter.clone())
            .collect()
    }

    pub async fn unsubscriptions(&self) -> Vec<String> {
        self.unsubscriptions.lock().await.clone()
    }

    pub async fn published(&self) -> Vec<Message> {
        self.published.lock().await.clone()
    }

    pub async fn disconnects(&self) -> u32 {
        *self.disconnects.lock().await
    }

    /// True if `disconnect` ran while the session's events half was still alive
    pub fn disconnected_while_streaming(&self) -> bool {
        self.disconnected_while_streaming.load(Ordering::SeqCst)
    }

    /// Make `subscribe` calls for this filter fail
    pub async fn fail_subscriptions_to(&self, filter: &str) {
        self.failing_filters.lock().await.insert(filter.to_string());
    }

    async fn close(&self) {
        *self.closed.lock().await = true;
    }

    async fn ensure_open(&self) -> LinkResult<()> {
        if *self.closed.lock().await {
            Err(LinkError::network("session closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TransportClient for RecordingClient {
    async fn subscribe(&self, filter: &str, qos: QoS) -> LinkResult<()> {
        self.ensure_open().await?;
        if self.failing_filters.lock().await.contains(filter) {
            return Err(LinkError::subscription(filter, "scripted failure"));
        }
        self.subscriptions
            .lock()
            .await
            .push((filter.to_string(), qos));
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> LinkResult<()> {
        self.ensure_open().await?;
        self.unsubscriptions.lock().await.push(filter.to_string());
        Ok(())
    }

    async fn publish(&self, message: &Message) -> LinkResult<()> {
        self.ensure_open().await?;
        self.published.lock().await.push(message.clone());
        Ok(())
    }

    async fn disconnect(&self) -> LinkResult<()> {
        if !self.events_dropped.load(Ordering::SeqCst) {
            self.disconnected_while_streaming.store(true, Ordering::SeqCst);
        }
        *self.disconnects.lock().await += 1;
        self.close().await;
        Ok(())
    }
}

/// Events half of a mock session
pub struct MockEvents {
    rx: mpsc::UnboundedReceiver<Result<TransportEvent, LinkError>>,
    client: Arc<RecordingClient>,
}

impl Drop for MockEvents {
    fn drop(&mut self) {
        self.client.events_dropped.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportEvents for MockEvents {
    async fn next_event(&mut self) -> Result<TransportEvent, LinkError> {
        match self.rx.recv().await {
            Some(event) => event,
            None => Err(LinkError::network("mock session closed")),
        }
    }
}

#[derive(Default)]
struct MockState {
    outcomes: VecDeque<Result<(), LinkError>>,
    fallback: Option<LinkError>,
    connect_delay: Option<Duration>,
    attempts: Vec<Instant>,
    sessions: Vec<Arc<RecordingClient>>,
    failing_filters: HashSet<String>,
    current: Option<(Arc<RecordingClient>, EventSender)>,
}

/// Scripted in-memory broker
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next unscripted connect attempt
    pub async fn push_outcome(&self, outcome: Result<(), LinkError>) {
        self.state.lock().await.outcomes.push_back(outcome);
    }

    /// Fail the next `count` connect attempts with `error`
    pub async fn fail_next(&self, count: usize, error: LinkError) {
        let mut state = self.state.lock().await;
        for _ in 0..count {
            state.outcomes.push_back(Err(error.clone()));
        }
    }

    /// Fail every connect attempt once the scripted outcomes run out
    pub async fn fail_always(&self, error: LinkError) {
        self.state.lock().await.fallback = Some(error);
    }

    /// Let connect attempts succeed again once the scripted outcomes run out
    pub async fn recover(&self) {
        self.state.lock().await.fallback = None;
    }

    /// Make each connect attempt take this long
    pub async fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().await.connect_delay = Some(delay);
    }

    /// Sessions created from now on reject `subscribe` for this filter
    pub async fn fail_subscriptions_to(&self, filter: &str) {
        self.state
            .lock()
            .await
            .failing_filters
            .insert(filter.to_string());
    }

    pub async fn connect_attempts(&self) -> Vec<Instant> {
        self.state.lock().await.attempts.clone()
    }

    pub async fn attempt_count(&self) -> usize {
        self.state.lock().await.attempts.len()
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Client of the `index`-th successful session
    pub async fn session(&self, index: usize) -> Option<Arc<RecordingClient>> {
        self.state.lock().await.sessions.get(index).cloned()
    }

    pub async fn current_client(&self) -> Option<Arc<RecordingClient>> {
        self.state
            .lock()
            .await
            .current
            .as_ref()
            .map(|(client, _)| client.clone())
    }

    /// Deliver a message on the live session; false if there is none
    pub async fn deliver(&self, message: Message) -> bool {
        self.send_event(Ok(TransportEvent::Message(message))).await
    }

    /// Report a broker-side SUBACK failure on the live session
    pub async fn reject_subscription(&self, filter: &str, reason: &str) -> bool {
        self.send_event(Ok(TransportEvent::SubscriptionRejected {
            filter: filter.to_string(),
            reason: reason.to_string(),
        }))
        .await
    }

    /// Drop the live session with `error`; false if there is none
    pub async fn drop_session(&self, error: LinkError) -> bool {
        let current = self.state.lock().await.current.take();
        match current {
            Some((client, tx)) => {
                client.close().await;
                tx.send(Err(error)).is_ok()
            }
            None => false,
        }
    }

    async fn send_event(&self, event: Result<TransportEvent, LinkError>) -> bool {
        let state = self.state.lock().await;
        match &state.current {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _config: &BrokerConfig) -> Result<Link, LinkError> {
        let delay = {
            let mut state = self.state.lock().await;
            state.attempts.push(Instant::now());
            state.connect_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        let outcome = match state.outcomes.pop_front() {
            Some(outcome) => outcome,
            None => match &state.fallback {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            },
        };
        outcome?;

        let client = Arc::new(RecordingClient::default());
        {
            let mut failing = client.failing_filters.lock().await;
            failing.extend(state.failing_filters.iter().cloned());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.sessions.push(client.clone());
        state.current = Some((client.clone(), tx));

        Ok(Link::new(
            client.clone(),
            Box::new(MockEvents { rx, client }),
        ))
    }
}

/// Handler that records what it receives and can publish a reply
#[derive(Debug)]
pub struct RecordingHandler {
    name: String,
    received: Mutex<Vec<Message>>,
    log: Option<Arc<Mutex<Vec<String>>>>,
    reply_topic: Option<String>,
}

impl RecordingHandler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            received: Mutex::new(Vec::new()),
            log: None,
            reply_topic: None,
        }
    }

    /// Also append the handler name to a shared log on every call
    pub fn with_log(name: &str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            log: Some(log),
            ..Self::new(name)
        }
    }

    /// Publish the received payload back to `topic`
    pub fn replying_to(name: &str, topic: &str) -> Self {
        Self {
            reply_topic: Some(topic.to_string()),
            ..Self::new(name)
        }
    }

    pub async fn received(&self) -> Vec<Message> {
        self.received.lock().await.clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &Message, publisher: &Publisher) -> LinkResult<()> {
        self.received.lock().await.push(message.clone());
        if let Some(log) = &self.log {
            log.lock().await.push(self.name.clone());
        }
        if let Some(topic) = &self.reply_topic {
            publisher
                .publish(topic, message.payload.clone(), QoS::AtLeastOnce)
                .await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Handler that always fails
#[derive(Debug, Clone)]
pub struct FailingHandler {
    reason: String,
}

impl FailingHandler {
    pub fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl MessageHandler for FailingHandler {
    async fn handle(&self, _message: &Message, _publisher: &Publisher) -> LinkResult<()> {
        Err(LinkError::handler(self.reason.clone()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}
