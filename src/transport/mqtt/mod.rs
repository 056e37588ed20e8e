//! MQTT 3.1.1 transport on rumqttc
//!
//! - [`connection`] - pure option building and error classification
//! - [`event_router`] - pure routing of rumqttc events
//! - [`client`] - the I/O side: handshake, poller task, client handle
//!
//! ```rust,no_run
//! use swiftmail::config::BrokerConfig;
//! use swiftmail::transport::{MqttTransport, Transport, TransportClient};
//!
//! # tokio_test::block_on(async {
//! let config = BrokerConfig::new("test.mosquitto.org", 1883, "SwiftMail-demo");
//! let link = MqttTransport::new().connect(&config).await?;
//! link.client.disconnect().await?;
//! # Ok::<(), swiftmail::error::LinkError>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod event_router;

pub use client::MqttTransport;
pub use connection::{classify_connack, configure_mqtt_options, map_connection_error};
pub use event_router::{route_event, EventRoute};
