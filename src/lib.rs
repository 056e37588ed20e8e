//! SwiftMail - MQTT session manager for a connected mailbox
//!
//! A gateway inside the mailbox publishes light and proximity readings to an
//! MQTT broker. This crate keeps one session to that broker alive, keeps
//! every subscription applied across reconnects, dispatches inbound messages
//! to handlers and turns sensor readings into mailbox events.
//!
//! - [`session`] - connection manager, retry policy, state and status events
//! - [`registry`] - topic filter → handler bindings replayed on every session
//! - [`dispatch`] - routing of inbound messages and the outbound publisher
//! - [`transport`] - the broker seam and its rumqttc implementation
//! - [`mailbox`] - sensor payload codecs and the mailbox state tracker
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use swiftmail::config::BrokerConfig;
//! use swiftmail::mailbox::{MailboxHandler, Thresholds};
//! use swiftmail::protocol::QoS;
//! use swiftmail::session::{ConnectionManager, RetryPolicy};
//! use swiftmail::transport::MqttTransport;
//!
//! # async fn demo() -> Result<(), swiftmail::error::LinkError> {
//! let mut manager = ConnectionManager::new(MqttTransport::new(), RetryPolicy::default());
//! manager
//!     .subscribe(
//!         "swiftmail/sensors",
//!         QoS::AtMostOnce,
//!         Arc::new(MailboxHandler::new(Thresholds::default(), None)),
//!     )
//!     .await?;
//! manager
//!     .connect(BrokerConfig::new("test.mosquitto.org", 1883, "SwiftMail-demo"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod mailbox;
pub mod observability;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{AppConfig, BrokerConfig, ConfigError};
pub use dispatch::{CommandDispatcher, DispatchOutcome, MessageHandler, Publisher};
pub use error::{LinkError, LinkResult};
pub use protocol::*;
pub use registry::{ReplayReport, Subscription, SubscriptionRegistry};
pub use session::{ConnectionManager, RetryPolicy, SessionState, StatusEvent};
