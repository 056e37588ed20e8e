//! Connection manager
//!
//! Owns the single broker session: the first attempt runs inside
//! [`ConnectionManager::connect`], everything after that runs on a
//! supervisor task that pumps inbound events and reconnects with backoff.
//!
//! All state transitions, subscription replays and live subscribes happen
//! under one session lock, so a subscription is either part of the replay
//! snapshot or issued live after the session is `Connected`.

use super::retry::{Backoff, RetryDecision, RetryPolicy};
use super::state::{log_state_transition, HealthMetrics, SessionState};
use super::status::{StatusEvent, StatusReporter};
use crate::config::BrokerConfig;
use crate::dispatch::{CommandDispatcher, MessageHandler, Publisher};
use crate::error::{LinkError, LinkResult};
use crate::protocol::{Message, QoS};
use crate::registry::SubscriptionRegistry;
use crate::transport::{Transport, TransportEvent, TransportEvents};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Inbound messages buffered between the supervisor and the dispatcher
pub const DISPATCH_CHANNEL_CAPACITY: usize = 256;

/// How long `disconnect` waits for background tasks before aborting them
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
struct SessionSlot {
    connected_at: Option<Instant>,
    last_message_at: Option<Instant>,
    reconnect_count: u32,
}

/// State shared between the manager handle and its supervisor task
struct Shared {
    slot: Mutex<SessionSlot>,
    state_tx: watch::Sender<SessionState>,
    status: StatusReporter,
    registry: SubscriptionRegistry,
    publisher: Publisher,
}

impl Shared {
    fn set_state(&self, next: SessionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            if !previous.can_transition_to(&next) {
                warn!("Unexpected session transition {:?} -> {:?}", previous, next);
            }
            log_state_transition(&previous, &next);
            self.status.report(StatusEvent::StateChanged {
                from: previous,
                to: next,
            });
        }
    }

    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// One connection attempt, bounded by the connect timeout and by shutdown
    ///
    /// Returns `Ok(None)` if shutdown was requested before the session could
    /// be published as `Connected`.
    async fn establish<T: Transport>(
        &self,
        transport: &T,
        config: &BrokerConfig,
        shutdown_rx: &mut watch::Receiver<bool>,
        is_reconnect: bool,
    ) -> LinkResult<Option<Box<dyn TransportEvents>>> {
        let connect_timeout = config.connect_timeout;
        let link = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown_rx) => return Ok(None),
            result = tokio::time::timeout(connect_timeout, transport.connect(config)) => match result {
                Ok(link) => link?,
                Err(_) => {
                    return Err(LinkError::network(format!(
                        "no CONNACK within {}s",
                        connect_timeout.as_secs_f64()
                    )))
                }
            },
        };

        let mut slot = self.slot.lock().await;
        if *shutdown_rx.borrow() {
            let _ = link.client.disconnect().await;
            return Ok(None);
        }

        let report = self.registry.replay_all(link.client.as_ref()).await;
        for (filter, error) in report.failed {
            self.status
                .report(StatusEvent::SubscriptionFailed { filter, error });
        }

        self.publisher.install(link.client).await;
        slot.connected_at = Some(Instant::now());
        if is_reconnect {
            slot.reconnect_count += 1;
        }
        self.set_state(SessionState::Connected);

        Ok(Some(link.events))
    }

    /// Tear down after the session dropped; returns how long it had been up
    async fn session_lost(&self, error: LinkError) -> Duration {
        let mut slot = self.slot.lock().await;
        self.publisher.take().await;
        let connected_for = slot
            .connected_at
            .take()
            .map(|t| t.elapsed())
            .unwrap_or_default();
        self.status.report(StatusEvent::SessionLost { error });
        connected_for
    }

    async fn touch(&self) {
        self.slot.lock().await.last_message_at = Some(Instant::now());
    }
}

struct Runtime {
    shutdown_tx: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// Keeps one broker session alive and routes its traffic
pub struct ConnectionManager<T: Transport> {
    transport: Arc<T>,
    retry: RetryPolicy,
    shared: Arc<Shared>,
    dispatcher: CommandDispatcher,
    runtime: Option<Runtime>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, retry: RetryPolicy) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let status = StatusReporter::new();
        let registry = SubscriptionRegistry::new();
        let publisher = Publisher::new(state_rx);
        let dispatcher = CommandDispatcher::new(registry.clone(), publisher.clone(), status.clone());

        Self {
            transport: Arc::new(transport),
            retry,
            shared: Arc::new(Shared {
                slot: Mutex::new(SessionSlot::default()),
                state_tx,
                status,
                registry,
                publisher,
            }),
            dispatcher,
            runtime: None,
        }
    }

    /// Open the session
    ///
    /// Resolves once the broker acknowledged the session and every registered
    /// subscription was replayed. A retriable failure is returned to the
    /// caller while the retry loop keeps going in the background.
    pub async fn connect(&mut self, config: BrokerConfig) -> LinkResult<()> {
        self.reap_finished().await;
        if self.runtime.is_some() {
            return Err(LinkError::InvalidState(
                "session already active, disconnect first".to_string(),
            ));
        }

        info!(endpoint = %config.endpoint(), client_id = %config.client_id, "Connecting to MQTT broker");
        let config = Arc::new(config);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        self.shared.set_state(SessionState::Connecting);
        let first = self
            .shared
            .establish(self.transport.as_ref(), &config, &mut shutdown_rx, false)
            .await;

        let (events, outcome) = match first {
            Ok(events) => (events, Ok(())),
            Err(error) => {
                self.shared.set_state(SessionState::Disconnected);
                self.shared.status.report(StatusEvent::ConnectFailed {
                    attempt: 0,
                    error: error.clone(),
                });
                if !self.retry.retries(&error) {
                    return Err(error);
                }
                info!("Initial connect failed, retrying in the background");
                (None, Err(error))
            }
        };

        let span = crate::session_span!(endpoint = %config.endpoint(), client_id = %config.client_id);
        let (message_tx, message_rx) = mpsc::channel(DISPATCH_CHANNEL_CAPACITY);
        let dispatcher = tokio::spawn(self.dispatcher.clone().run(message_rx));
        let supervisor = tokio::spawn(
            supervise(
                self.shared.clone(),
                self.transport.clone(),
                config,
                self.retry.clone(),
                events,
                message_tx,
                shutdown_rx,
            )
            .instrument(span),
        );

        self.runtime = Some(Runtime {
            shutdown_tx,
            supervisor,
            dispatcher,
        });
        outcome
    }

    /// Close the session and stop retrying
    ///
    /// Any pending retry wait or in-flight connect attempt is abandoned; no
    /// further attempt starts after this returns. The broker DISCONNECT is
    /// queued before the supervisor is told to stop, and the final
    /// `Disconnected` transition happens only once the supervisor is gone.
    pub async fn disconnect(&mut self) -> LinkResult<()> {
        let runtime = self.runtime.take();

        let mut result = Ok(());
        {
            let mut slot = self.shared.slot.lock().await;
            if let Some(client) = self.shared.publisher.take().await {
                if let Err(e) = client.disconnect().await {
                    warn!(error = %e.redacted(), "Broker disconnect failed");
                    result = Err(e);
                }
            }
            slot.connected_at = None;
            if let Some(runtime) = &runtime {
                runtime.shutdown_tx.send_replace(true);
            }
        }

        if let Some(runtime) = runtime {
            let Runtime {
                supervisor,
                dispatcher,
                ..
            } = runtime;
            await_task("supervisor", supervisor).await;
            await_task("dispatcher", dispatcher).await;
        }

        {
            let _slot = self.shared.slot.lock().await;
            self.shared.set_state(SessionState::Disconnected);
        }

        info!("Disconnected from MQTT broker");
        result
    }

    /// Publish through the current session; rejected unless `Connected`
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
    ) -> LinkResult<()> {
        self.shared.publisher.publish(topic, payload, qos).await
    }

    pub async fn publish_message(&self, message: Message) -> LinkResult<()> {
        self.shared.publisher.publish_message(message).await
    }

    /// Register a binding and, when connected, subscribe on the live session
    ///
    /// The binding is kept even if the live subscribe fails; the next
    /// session replays it.
    pub async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: Arc<dyn MessageHandler>,
    ) -> LinkResult<()> {
        let _slot = self.shared.slot.lock().await;
        let filter = self.shared.registry.subscribe(filter, qos, handler).await?;

        if self.shared.state().can_publish() {
            if let Some(client) = self.shared.publisher.current().await {
                if let Err(error) = client.subscribe(filter.as_str(), qos).await {
                    self.shared.status.report(StatusEvent::SubscriptionFailed {
                        filter: filter.to_string(),
                        error: error.clone(),
                    });
                    return Err(error);
                }
            }
        }

        debug!(filter = %filter, %qos, "Subscription registered");
        Ok(())
    }

    /// Remove a binding and, when connected, unsubscribe on the live session
    pub async fn unsubscribe(&self, filter: &str) -> LinkResult<bool> {
        let _slot = self.shared.slot.lock().await;
        let removed = self.shared.registry.unsubscribe(filter).await;

        if removed && self.shared.state().can_publish() {
            if let Some(client) = self.shared.publisher.current().await {
                client.unsubscribe(filter).await?;
            }
        }
        Ok(removed)
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn status_events(&self) -> broadcast::Receiver<StatusEvent> {
        self.shared.status.subscribe()
    }

    /// Handle for publishing from outside a handler
    pub fn publisher(&self) -> Publisher {
        self.shared.publisher.clone()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.shared.registry
    }

    pub async fn health(&self) -> HealthMetrics {
        let slot = self.shared.slot.lock().await;
        HealthMetrics::calculate(slot.connected_at, slot.last_message_at, slot.reconnect_count)
    }

    /// True while the supervisor is running
    pub fn is_running(&self) -> bool {
        self.runtime
            .as_ref()
            .is_some_and(|runtime| !runtime.supervisor.is_finished())
    }

    /// Wait until the state satisfies `predicate`
    pub async fn wait_for_state<F>(&self, predicate: F, timeout: Duration) -> LinkResult<SessionState>
    where
        F: Fn(&SessionState) -> bool,
    {
        let mut state_rx = self.state_receiver();
        let wait = async {
            loop {
                let current = *state_rx.borrow_and_update();
                if predicate(&current) {
                    return Ok(current);
                }
                if state_rx.changed().await.is_err() {
                    return Err(LinkError::InvalidState("state channel closed".to_string()));
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::InvalidState(format!(
                "timed out after {:?} waiting for session state, currently {:?}",
                timeout,
                self.state()
            ))),
        }
    }

    /// Drop a runtime whose supervisor already gave up
    async fn reap_finished(&mut self) {
        let finished = self
            .runtime
            .as_ref()
            .is_some_and(|runtime| runtime.supervisor.is_finished());
        if finished {
            if let Some(runtime) = self.runtime.take() {
                await_task("dispatcher", runtime.dispatcher).await;
            }
        }
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_tx.send_replace(true);
            runtime.supervisor.abort();
            runtime.dispatcher.abort();
        }
    }
}

enum SessionEnd {
    Shutdown,
    Lost(LinkError),
}

/// Supervisor loop: pump the live session, reconnect when it drops
async fn supervise<T: Transport>(
    shared: Arc<Shared>,
    transport: Arc<T>,
    config: Arc<BrokerConfig>,
    retry: RetryPolicy,
    mut events: Option<Box<dyn TransportEvents>>,
    message_tx: mpsc::Sender<Message>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(retry.clone());

    loop {
        if let Some(mut stream) = events.take() {
            backoff.on_connected();
            match pump(&shared, stream.as_mut(), &message_tx, &mut shutdown_rx).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Lost(error) => {
                    drop(stream);
                    let connected_for = shared.session_lost(error).await;
                    backoff.on_session_ended(connected_for);
                }
            }
        }

        let shutdown = *shutdown_rx.borrow();
        match backoff.next(shutdown) {
            RetryDecision::AbortShutdownRequested => break,
            RetryDecision::AbortMaxAttemptsExceeded { attempts } => {
                shared.set_state(SessionState::Disconnected);
                shared
                    .status
                    .report(StatusEvent::RetriesExhausted { attempts });
                break;
            }
            RetryDecision::Proceed { attempt, delay } => {
                shared.set_state(SessionState::Reconnecting { attempt });
                info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");

                if !interruptible_sleep(&mut shutdown_rx, delay).await {
                    break;
                }

                match shared
                    .establish(transport.as_ref(), &config, &mut shutdown_rx, true)
                    .await
                {
                    Ok(Some(stream)) => events = Some(stream),
                    Ok(None) => break,
                    Err(error) => {
                        let retriable = retry.retries(&error);
                        shared
                            .status
                            .report(StatusEvent::ConnectFailed { attempt, error });
                        if !retriable {
                            shared.set_state(SessionState::Disconnected);
                            break;
                        }
                    }
                }
            }
        }
    }

    info!("Session supervisor stopped");
}

/// Forward inbound events until the session ends or shutdown is requested
async fn pump(
    shared: &Shared,
    events: &mut dyn TransportEvents,
    message_tx: &mpsc::Sender<Message>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown_rx) => return SessionEnd::Shutdown,
            event = events.next_event() => event,
        };

        match event {
            Ok(TransportEvent::Message(message)) => {
                shared.touch().await;
                tokio::select! {
                    biased;
                    _ = shutdown_requested(shutdown_rx) => return SessionEnd::Shutdown,
                    sent = message_tx.send(message) => {
                        if sent.is_err() {
                            return SessionEnd::Shutdown;
                        }
                    }
                }
            }
            Ok(TransportEvent::SubscriptionRejected { filter, reason }) => {
                let error = LinkError::subscription(filter.clone(), reason);
                shared
                    .status
                    .report(StatusEvent::SubscriptionFailed { filter, error });
            }
            Ok(TransportEvent::Malformed { topic, reason }) => {
                shared.status.report(StatusEvent::MessageDropped {
                    topic,
                    error: LinkError::protocol(reason),
                });
            }
            Err(error) => return SessionEnd::Lost(error),
        }
    }
}

/// Resolves once shutdown is requested or the manager is gone
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep that wakes early on shutdown; returns false if interrupted
async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_requested(shutdown_rx) => {
            debug!("Backoff wait interrupted by shutdown");
            false
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn await_task(name: &str, mut handle: JoinHandle<()>) {
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
        Ok(Ok(())) => debug!(task = name, "Background task finished"),
        Ok(Err(e)) if e.is_cancelled() => debug!(task = name, "Background task cancelled"),
        Ok(Err(e)) => warn!(task = name, error = %e, "Background task panicked"),
        Err(_) => {
            warn!(task = name, "Background task did not stop in time, aborting");
            handle.abort();
        }
    }
}
