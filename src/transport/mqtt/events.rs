//! Pure routing of rumqttc events into transport events
//!
//! The event loop task only needs to know whether an event is forwarded to
//! the session stream, ends the session, carries a packet id or an
//! acknowledgement for a pending request, or is protocol chatter to log.

use super::acks::{AckResult, RequestKind};
use crate::protocol::InboundMessage;
use crate::transport::TransportEvent;
use rumqttc::v5::mqttbytes::v5::{
    ConnectReturnCode, Packet, PubAckReason, PubCompReason, PubRecReason, SubscribeReasonCode,
    UnsubAckReason,
};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Forward to the session event stream
    Forward(TransportEvent),
    /// Session ended; forward and stop polling
    Terminal(TransportEvent),
    /// A request left the client with this packet id
    Sent(RequestKind, u16),
    /// The broker acknowledged, or refused, a request
    Acknowledged {
        kind: RequestKind,
        pkid: u16,
        result: AckResult,
    },
    /// Infrastructure event (PingResp, PubRel, ...)
    Infrastructure(String),
    /// Outgoing event (handled automatically)
    Outgoing,
}

/// Route MQTT event to the session stream (pure routing decision)
pub fn route_mqtt_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(ack) => {
                if matches!(ack.code, ConnectReturnCode::Success) {
                    EventRoute::Forward(TransportEvent::Connected)
                } else {
                    EventRoute::Terminal(TransportEvent::Error(format!(
                        "Broker refused connection: {:?}",
                        ack.code
                    )))
                }
            }
            Packet::Publish(publish) => EventRoute::Forward(TransportEvent::Message(
                InboundMessage::new(
                    String::from_utf8_lossy(&publish.topic).to_string(),
                    publish.payload.clone(),
                ),
            )),
            Packet::Disconnect(_) => EventRoute::Terminal(TransportEvent::Closed),
            Packet::SubAck(ack) => {
                let refused: Vec<_> = ack
                    .return_codes
                    .iter()
                    .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
                    .collect();
                acknowledged(
                    RequestKind::Subscribe,
                    ack.pkid,
                    refused.is_empty(),
                    format_args!("Subscription refused: {refused:?}"),
                )
            }
            Packet::UnsubAck(ack) => {
                let refused: Vec<_> = ack
                    .reasons
                    .iter()
                    .filter(|reason| {
                        !matches!(
                            reason,
                            UnsubAckReason::Success | UnsubAckReason::NoSubscriptionExisted
                        )
                    })
                    .collect();
                acknowledged(
                    RequestKind::Unsubscribe,
                    ack.pkid,
                    refused.is_empty(),
                    format_args!("Unsubscribe refused: {refused:?}"),
                )
            }
            Packet::PubAck(ack) => acknowledged(
                RequestKind::Publish,
                ack.pkid,
                matches!(
                    ack.reason,
                    PubAckReason::Success | PubAckReason::NoMatchingSubscribers
                ),
                format_args!("Publish refused: {:?}", ack.reason),
            ),
            // QoS 2 completes on PUBCOMP; PUBREC only matters when it refuses
            Packet::PubRec(rec)
                if !matches!(
                    rec.reason,
                    PubRecReason::Success | PubRecReason::NoMatchingSubscribers
                ) =>
            {
                acknowledged(
                    RequestKind::Publish,
                    rec.pkid,
                    false,
                    format_args!("Publish refused: {:?}", rec.reason),
                )
            }
            Packet::PubComp(comp) => acknowledged(
                RequestKind::Publish,
                comp.pkid,
                matches!(comp.reason, PubCompReason::Success),
                format_args!("Publish not completed: {:?}", comp.reason),
            ),
            other => EventRoute::Infrastructure(format!("{other:?}")),
        },
        Event::Outgoing(outgoing) => match outgoing {
            Outgoing::Publish(pkid) => EventRoute::Sent(RequestKind::Publish, *pkid),
            Outgoing::Subscribe(pkid) => EventRoute::Sent(RequestKind::Subscribe, *pkid),
            Outgoing::Unsubscribe(pkid) => EventRoute::Sent(RequestKind::Unsubscribe, *pkid),
            _ => EventRoute::Outgoing,
        },
    }
}

fn acknowledged(
    kind: RequestKind,
    pkid: u16,
    success: bool,
    refusal: std::fmt::Arguments<'_>,
) -> EventRoute {
    let result = if success { Ok(()) } else { Err(refusal.to_string()) };
    EventRoute::Acknowledged { kind, pkid, result }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, Disconnect, DisconnectReasonCode, PubAck, PubComp, PubRec, Publish, SubAck,
        UnsubAck,
    };
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_connack_routes_to_connected() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(
            route_mqtt_event(&connack),
            EventRoute::Forward(TransportEvent::Connected)
        );
    }

    #[test]
    fn test_refused_connack_is_terminal() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::NotAuthorized,
            properties: None,
        }));
        assert!(matches!(
            route_mqtt_event(&connack),
            EventRoute::Terminal(TransportEvent::Error(reason)) if reason.contains("NotAuthorized")
        ));
    }

    #[test]
    fn test_disconnect_is_terminal() {
        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert_eq!(
            route_mqtt_event(&disconnect),
            EventRoute::Terminal(TransportEvent::Closed)
        );
    }

    #[test]
    fn test_publish_routes_to_message() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("sensors/t1"),
            pkid: 1,
            payload: Bytes::from(r#"{"x":1}"#),
            properties: None,
        }));

        match route_mqtt_event(&publish) {
            EventRoute::Forward(TransportEvent::Message(message)) => {
                assert_eq!(message.topic, "sensors/t1");
                assert_eq!(message.payload, Bytes::from(r#"{"x":1}"#));
            }
            other => panic!("Expected message route, got {other:?}"),
        }
    }

    #[test]
    fn test_granted_suback_acknowledges_subscribe() {
        let suback = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 4,
            return_codes: vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)],
            properties: None,
        }));
        assert_eq!(
            route_mqtt_event(&suback),
            EventRoute::Acknowledged {
                kind: RequestKind::Subscribe,
                pkid: 4,
                result: Ok(()),
            }
        );
    }

    #[test]
    fn test_failed_suback_refuses_subscribe() {
        let suback = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 5,
            return_codes: vec![SubscribeReasonCode::NotAuthorized],
            properties: None,
        }));
        match route_mqtt_event(&suback) {
            EventRoute::Acknowledged {
                kind: RequestKind::Subscribe,
                pkid: 5,
                result: Err(reason),
            } => assert!(reason.contains("NotAuthorized")),
            other => panic!("Expected refused subscribe, got {other:?}"),
        }
    }

    #[test]
    fn test_unsuback_for_missing_subscription_is_success() {
        let unsuback = Event::Incoming(Packet::UnsubAck(UnsubAck {
            pkid: 2,
            reasons: vec![UnsubAckReason::NoSubscriptionExisted],
            properties: None,
        }));
        assert_eq!(
            route_mqtt_event(&unsuback),
            EventRoute::Acknowledged {
                kind: RequestKind::Unsubscribe,
                pkid: 2,
                result: Ok(()),
            }
        );
    }

    #[test]
    fn test_publish_acknowledgements() {
        let puback = Event::Incoming(Packet::PubAck(PubAck {
            pkid: 9,
            reason: PubAckReason::NoMatchingSubscribers,
            properties: None,
        }));
        assert_eq!(
            route_mqtt_event(&puback),
            EventRoute::Acknowledged {
                kind: RequestKind::Publish,
                pkid: 9,
                result: Ok(()),
            }
        );

        let refused = Event::Incoming(Packet::PubAck(PubAck {
            pkid: 10,
            reason: PubAckReason::QuotaExceeded,
            properties: None,
        }));
        assert!(matches!(
            route_mqtt_event(&refused),
            EventRoute::Acknowledged { pkid: 10, result: Err(_), .. }
        ));

        let pubrec = Event::Incoming(Packet::PubRec(PubRec {
            pkid: 11,
            reason: PubRecReason::Success,
            properties: None,
        }));
        assert!(matches!(
            route_mqtt_event(&pubrec),
            EventRoute::Infrastructure(_)
        ));

        let pubcomp = Event::Incoming(Packet::PubComp(PubComp {
            pkid: 11,
            reason: PubCompReason::Success,
            properties: None,
        }));
        assert_eq!(
            route_mqtt_event(&pubcomp),
            EventRoute::Acknowledged {
                kind: RequestKind::Publish,
                pkid: 11,
                result: Ok(()),
            }
        );
    }

    #[test]
    fn test_outgoing_requests_carry_packet_ids() {
        assert_eq!(
            route_mqtt_event(&Event::Outgoing(Outgoing::Subscribe(3))),
            EventRoute::Sent(RequestKind::Subscribe, 3)
        );
        assert_eq!(
            route_mqtt_event(&Event::Outgoing(Outgoing::Publish(0))),
            EventRoute::Sent(RequestKind::Publish, 0)
        );
        assert_eq!(
            route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::Outgoing
        );
    }
}
