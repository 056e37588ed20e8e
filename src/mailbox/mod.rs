//! Mailbox sensor domain
//!
//! A gateway in the mailbox samples a light sensor (door open/closed) and a
//! proximity sensor (mail present) and publishes the readings over MQTT.

pub mod handler;
pub mod monitor;
pub mod reading;

pub use handler::MailboxHandler;
pub use monitor::{MailboxEvent, MailboxMonitor, MailboxState, Thresholds};
pub use reading::{GatewayReport, ReadingError, ReportThresholds, SensorReading};
