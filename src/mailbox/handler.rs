//! Dispatcher handler wrapping the mailbox monitor

use super::monitor::{MailboxEvent, MailboxMonitor, MailboxState, Thresholds};
use super::reading::SensorReading;
use crate::config::MailboxSection;
use crate::dispatch::{MessageHandler, Publisher};
use crate::error::{LinkError, LinkResult};
use crate::protocol::{Message, QoS};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct MailboxHandler {
    monitor: Mutex<MailboxMonitor>,
    events_topic: Option<String>,
}

impl MailboxHandler {
    pub fn new(thresholds: Thresholds, events_topic: Option<String>) -> Self {
        Self {
            monitor: Mutex::new(MailboxMonitor::new(thresholds)),
            events_topic,
        }
    }

    pub fn from_config(section: &MailboxSection) -> Self {
        Self::new(
            Thresholds {
                lux_open: section.lux_open_threshold,
                proximity_mail: section.proximity_mail_threshold,
            },
            section.events_topic.clone(),
        )
    }

    pub async fn state(&self) -> MailboxState {
        self.monitor.lock().await.state()
    }

    async fn announce(&self, event: &MailboxEvent, publisher: &Publisher) -> LinkResult<()> {
        match event {
            MailboxEvent::DoorOpened { .. } => info!("Mailbox door opened"),
            MailboxEvent::DoorClosed { .. } => info!("Mailbox door closed"),
            MailboxEvent::MailDelivered { at } => info!(at = %at, "New mail delivered"),
            MailboxEvent::MailCollected { .. } => info!("Mail collected"),
        }

        if let Some(topic) = &self.events_topic {
            let payload = serde_json::to_vec(event)
                .map_err(|e| LinkError::handler(format!("cannot encode {}: {e}", event.name())))?;
            publisher.publish(topic, payload, QoS::AtLeastOnce).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for MailboxHandler {
    async fn handle(&self, message: &Message, publisher: &Publisher) -> LinkResult<()> {
        let reading = SensorReading::parse(&message.payload)
            .map_err(|e| LinkError::protocol(format!("sensor payload on '{}': {e}", message.topic)))?;
        debug!(lux = ?reading.lux, proximity = ?reading.proximity, "Sensor reading");

        let events = self.monitor.lock().await.apply(&reading, Utc::now());

        let mut first_error = None;
        for event in &events {
            if let Err(e) = self.announce(event, publisher).await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "mailbox"
    }
}
