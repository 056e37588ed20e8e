//! rumqttc-backed transport
//!
//! `connect` drives a fresh event loop until CONNACK, then hands the loop to
//! a poller task. The poller keeps the loop running independently of the
//! consumer, correlates SUBSCRIBE packet ids with filters, and forwards
//! routed events. The poller stops once our DISCONNECT is written; dropping
//! the events half stops it after [`DISCONNECT_FLUSH`] at the latest.

use super::connection::{configure_mqtt_options, map_connection_error, REQUEST_CHANNEL_CAPACITY};
use super::event_router::{route_event, EventRoute};
use crate::config::BrokerConfig;
use crate::error::LinkError;
use crate::protocol::{Message, QoS};
use crate::transport::{Link, Transport, TransportClient, TransportEvent, TransportEvents};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Packet};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

type EventResult = Result<TransportEvent, LinkError>;

/// Give a queued DISCONNECT this long to reach the wire once the events half is gone
pub const DISCONNECT_FLUSH: Duration = Duration::from_secs(1);

/// Production transport speaking MQTT 3.1.1 through rumqttc
#[derive(Debug, Clone, Default)]
pub struct MqttTransport;

impl MqttTransport {
    pub fn new() -> Self {
        Self
    }

    async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), LinkError> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    debug!(target: "mqtt_transport", session_present = ack.session_present, "CONNACK received");
                    return super::connection::classify_connack(ack.code);
                }
                Ok(_) => continue,
                Err(e) => return Err(map_connection_error(e)),
            }
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, config: &BrokerConfig) -> Result<Link, LinkError> {
        let options = configure_mqtt_options(config);
        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        Self::wait_for_connack(&mut event_loop).await?;
        info!(endpoint = %config.endpoint(), client_id = %config.client_id, "Broker accepted session");

        let pending = Arc::new(Mutex::new(VecDeque::new()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let poller = tokio::spawn(poll_events(event_loop, pending.clone(), event_tx));

        let client = MqttLinkClient {
            client,
            pending,
            subscribe_lock: Mutex::new(()),
        };
        let events = MqttLinkEvents {
            event_rx,
            poller: Some(poller),
        };

        Ok(Link::new(Arc::new(client), Box::new(events)))
    }
}

/// Outbound half of a rumqttc session
struct MqttLinkClient {
    client: AsyncClient,
    /// Filters of SUBSCRIBE requests queued but not yet sent, in request order
    pending: Arc<Mutex<VecDeque<String>>>,
    /// Keeps queue order identical to request order
    subscribe_lock: Mutex<()>,
}

#[async_trait]
impl TransportClient for MqttLinkClient {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), LinkError> {
        let _order = self.subscribe_lock.lock().await;
        self.pending.lock().await.push_back(filter.to_string());

        if let Err(e) = self.client.subscribe(filter, qos.into()).await {
            self.pending.lock().await.pop_back();
            return Err(LinkError::subscription(filter, e.to_string()));
        }
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), LinkError> {
        self.client
            .unsubscribe(filter)
            .await
            .map_err(|e| LinkError::network(format!("unsubscribe '{filter}' failed: {e}")))
    }

    async fn publish(&self, message: &Message) -> Result<(), LinkError> {
        self.client
            .publish(
                message.topic.as_str(),
                message.qos.into(),
                message.retain,
                message.payload.to_vec(),
            )
            .await
            .map_err(|e| LinkError::network(format!("publish to '{}' failed: {e}", message.topic)))
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| LinkError::network(format!("disconnect failed: {e}")))
    }
}

/// Inbound half of a rumqttc session
struct MqttLinkEvents {
    event_rx: mpsc::UnboundedReceiver<EventResult>,
    poller: Option<JoinHandle<()>>,
}

#[async_trait]
impl TransportEvents for MqttLinkEvents {
    async fn next_event(&mut self) -> Result<TransportEvent, LinkError> {
        match self.event_rx.recv().await {
            Some(result) => result,
            None => Err(LinkError::network("event loop stopped")),
        }
    }
}

impl Drop for MqttLinkEvents {
    fn drop(&mut self) {
        let Some(mut poller) = self.poller.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if timeout(DISCONNECT_FLUSH, &mut poller).await.is_err() {
                        poller.abort();
                    }
                });
            }
            Err(_) => poller.abort(),
        }
    }
}

/// Drive the event loop until it fails or the consumer goes away
async fn poll_events(
    mut event_loop: EventLoop,
    pending: Arc<Mutex<VecDeque<String>>>,
    event_tx: mpsc::UnboundedSender<EventResult>,
) {
    let mut in_flight: HashMap<u16, String> = HashMap::new();

    loop {
        let event = match event_loop.poll().await {
            Ok(event) => event,
            Err(e) => {
                let _ = event_tx.send(Err(map_connection_error(e)));
                return;
            }
        };

        let forwarded = match route_event(&event) {
            EventRoute::MessageReceived(message) => Some(TransportEvent::Message(message)),
            EventRoute::MalformedMessage { topic, reason } => {
                Some(TransportEvent::Malformed { topic, reason })
            }
            EventRoute::SubscribeSent { pkid } => {
                match pending.lock().await.pop_front() {
                    Some(filter) => {
                        in_flight.insert(pkid, filter);
                    }
                    None => warn!(target: "mqtt_transport", pkid, "SUBSCRIBE sent with no pending filter"),
                }
                None
            }
            EventRoute::SubscribeAcknowledged { pkid, rejected } => {
                let filter = in_flight.remove(&pkid);
                match (filter, rejected) {
                    (Some(filter), true) => Some(TransportEvent::SubscriptionRejected {
                        filter,
                        reason: "broker returned SUBACK failure".to_string(),
                    }),
                    (Some(filter), false) => {
                        debug!(target: "mqtt_transport", %filter, "Subscription granted");
                        None
                    }
                    (None, _) => {
                        warn!(target: "mqtt_transport", pkid, "SUBACK for unknown packet id");
                        None
                    }
                }
            }
            EventRoute::Disconnected => {
                let _ = event_tx.send(Err(LinkError::network("broker closed the session")));
                return;
            }
            EventRoute::DisconnectSent => {
                debug!(target: "mqtt_transport", "DISCONNECT flushed, poller stopping");
                let _ = event_tx.send(Err(LinkError::network("client disconnected")));
                return;
            }
            EventRoute::Infrastructure(detail) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", detail);
                None
            }
        };

        if let Some(event) = forwarded {
            if event_tx.send(Ok(event)).is_err() {
                return;
            }
        }
    }
}
