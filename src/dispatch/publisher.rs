//! Outbound publishing through the current session
//!
//! The connection manager installs the client of each new session and
//! clears it when the session ends. Publishes hold the slot lock for the
//! duration of the send, so at most one publish is in flight at a time.

use crate::error::{LinkError, LinkResult};
use crate::protocol::{validate_topic_name, Message, QoS};
use crate::session::SessionState;
use crate::transport::TransportClient;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::debug;

type ClientSlot = Arc<Mutex<Option<Arc<dyn TransportClient>>>>;

#[derive(Clone)]
pub struct Publisher {
    client: ClientSlot,
    state_rx: watch::Receiver<SessionState>,
}

impl Publisher {
    pub fn new(state_rx: watch::Receiver<SessionState>) -> Self {
        Self {
            client: Arc::new(Mutex::new(None)),
            state_rx,
        }
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
    ) -> LinkResult<()> {
        self.publish_message(Message::new(topic, payload, qos)).await
    }

    pub async fn publish_message(&self, message: Message) -> LinkResult<()> {
        validate_topic_name(&message.topic)?;

        let state = *self.state_rx.borrow();
        if !state.can_publish() {
            return Err(LinkError::NotConnected { state });
        }

        let slot = self.client.lock().await;
        let client = slot.as_ref().ok_or(LinkError::NotConnected { state })?;
        client.publish(&message).await?;
        debug!(topic = %message.topic, qos = %message.qos, bytes = message.payload.len(), "Published message");
        Ok(())
    }

    pub(crate) async fn install(&self, client: Arc<dyn TransportClient>) {
        *self.client.lock().await = Some(client);
    }

    pub(crate) async fn take(&self) -> Option<Arc<dyn TransportClient>> {
        self.client.lock().await.take()
    }

    pub(crate) async fn current(&self) -> Option<Arc<dyn TransportClient>> {
        self.client.lock().await.clone()
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("state", &*self.state_rx.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::mocks::RecordingClient;

    #[tokio::test]
    async fn test_publish_rejected_while_not_connected() {
        let (_state_tx, state_rx) = watch::channel(SessionState::Reconnecting { attempt: 2 });
        let publisher = Publisher::new(state_rx);

        let err = publisher
            .publish("swiftmail/events", "x", QoS::AtMostOnce)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LinkError::NotConnected {
                state: SessionState::Reconnecting { attempt: 2 }
            }
        );
    }

    #[tokio::test]
    async fn test_publish_goes_through_installed_client() {
        let (_state_tx, state_rx) = watch::channel(SessionState::Connected);
        let publisher = Publisher::new(state_rx);
        let client = Arc::new(RecordingClient::default());
        publisher.install(client.clone()).await;

        publisher
            .publish("swiftmail/events", "door_opened", QoS::AtLeastOnce)
            .await
            .unwrap();

        let published = client.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "swiftmail/events");
        assert_eq!(published[0].qos, QoS::AtLeastOnce);
    }

    #[tokio::test]
    async fn test_publish_rejects_wildcard_topic() {
        let (_state_tx, state_rx) = watch::channel(SessionState::Connected);
        let publisher = Publisher::new(state_rx);
        let err = publisher
            .publish("swiftmail/#", "x", QoS::AtMostOnce)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTopic);
    }

    #[tokio::test]
    async fn test_publish_without_client_is_not_connected() {
        let (_state_tx, state_rx) = watch::channel(SessionState::Connected);
        let publisher = Publisher::new(state_rx);
        let err = publisher
            .publish("swiftmail/events", "x", QoS::AtMostOnce)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }
}
