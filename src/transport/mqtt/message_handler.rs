//! Pure routing of rumqttc event-loop events
//!
//! The driver task in [`super::client`] polls the event loop and hands every
//! event to [`MessageHandler::route_mqtt_event`]; the resulting [`EventRoute`]
//! decides what the driver does next.

use rumqttc::{Event, Outgoing, Packet, SubscribeReasonCode};

/// Pure routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route an MQTT event to the appropriate handler
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                },
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    rejected: Self::count_rejections(&suback.return_codes),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::OutgoingDisconnect,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Number of filters the broker refused in a SUBACK
    pub fn count_rejections(return_codes: &[SubscribeReasonCode]) -> usize {
        return_codes
            .iter()
            .filter(|code| matches!(code, SubscribeReasonCode::Failure))
            .count()
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connection
    ConnectionAcknowledged,
    /// Message delivered on a subscribed topic
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    /// Broker closed the session
    Disconnected,
    /// SUBACK with the number of refused filters
    SubscriptionConfirmed { packet_id: u16, rejected: usize },
    /// Our own DISCONNECT left the client
    OutgoingDisconnect,
    /// PingResp, PubAck and friends
    InfrastructureEvent(String),
    /// Any other outgoing packet
    OutgoingEvent,
}
