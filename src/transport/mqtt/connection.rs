//! Pure connection setup for the rumqttc transport
//!
//! Option building and error classification; no I/O happens here.

use crate::config::BrokerConfig;
use crate::error::LinkError;
use rumqttc::{ConnectReturnCode, ConnectionError, MqttOptions, Transport as RumqttcTransport};

/// Requests that may queue between the client handle and the event loop
pub const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Largest inbound/outbound packet accepted
pub const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Build rumqttc options from a broker configuration
pub fn configure_mqtt_options(config: &BrokerConfig) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);

    if config.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(credentials) = &config.credentials {
        mqtt_options.set_credentials(&credentials.username, &credentials.password);
    }

    mqtt_options.set_keep_alive(config.keep_alive);
    mqtt_options.set_clean_session(config.clean_session);
    mqtt_options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    mqtt_options
}

/// Map a CONNACK return code to a session outcome
pub fn classify_connack(code: ConnectReturnCode) -> Result<(), LinkError> {
    match code {
        ConnectReturnCode::Success => Ok(()),
        ConnectReturnCode::BadUserNamePassword => {
            Err(LinkError::auth("broker rejected username or password"))
        }
        ConnectReturnCode::NotAuthorized => Err(LinkError::auth("client not authorized")),
        other => Err(LinkError::network(format!("connection refused: {other:?}"))),
    }
}

/// Map an event loop failure to a link error
pub fn map_connection_error(error: ConnectionError) -> LinkError {
    match error {
        ConnectionError::ConnectionRefused(code) => match classify_connack(code) {
            Err(e) => e,
            Ok(()) => LinkError::network("connection refused"),
        },
        other => LinkError::network(other.to_string()),
    }
}
