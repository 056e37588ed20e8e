//! Pure routing of rumqttc events
//!
//! The poller in [`super::client`] feeds every event through [`route_event`]
//! and only acts on the returned [`EventRoute`]. A PUBLISH whose topic is not
//! UTF-8 never gets here: rumqttc fails the event loop and the session drops.

use crate::protocol::{validate_topic_name, Message};
use rumqttc::{Event, Outgoing, Packet, SubscribeReasonCode};

/// What the poller should do with an event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Inbound application message
    MessageReceived(Message),
    /// Inbound PUBLISH that cannot be delivered
    MalformedMessage { topic: String, reason: String },
    /// A SUBSCRIBE left the client with this packet id
    SubscribeSent { pkid: u16 },
    /// Broker answered a SUBSCRIBE; `rejected` is true if any filter was refused
    SubscribeAcknowledged { pkid: u16, rejected: bool },
    /// Broker closed the session
    Disconnected,
    /// Our DISCONNECT was written; nothing more will be sent
    DisconnectSent,
    /// Keep-alive, acks and other bookkeeping traffic
    Infrastructure(String),
}

pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(Packet::Publish(publish)) => {
            match validate_topic_name(&publish.topic) {
                Ok(()) => {
                    let mut message = Message::new(
                        publish.topic.clone(),
                        publish.payload.clone(),
                        publish.qos.into(),
                    );
                    message.retain = publish.retain;
                    EventRoute::MessageReceived(message)
                }
                Err(e) => EventRoute::MalformedMessage {
                    topic: publish.topic.clone(),
                    reason: e.to_string(),
                },
            }
        }
        Event::Incoming(Packet::SubAck(suback)) => EventRoute::SubscribeAcknowledged {
            pkid: suback.pkid,
            rejected: suback
                .return_codes
                .iter()
                .any(|code| matches!(code, SubscribeReasonCode::Failure)),
        },
        Event::Incoming(Packet::Disconnect) => EventRoute::Disconnected,
        Event::Outgoing(Outgoing::Subscribe(pkid)) => EventRoute::SubscribeSent { pkid: *pkid },
        Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
        Event::Incoming(other) => EventRoute::Infrastructure(format!("{other:?}")),
        Event::Outgoing(other) => EventRoute::Infrastructure(format!("{other:?}")),
    }
}
