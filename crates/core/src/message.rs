//! Inter-agent network messages.
//!
//! Every message is a single JSON object: the envelope fields
//! (`src`/`dest`/`isrc`/`timestamp`) plus a flattened, internally-tagged
//! payload. The `type` discriminator uses upper-snake names, so a PING
//! looks like:
//!
//! ```json
//! {"type":"PING","src":"a1","dest":"b2","isrc":"a1","timestamp":1700000000.0}
//! ```
//!
//! Unknown extra fields are tolerated on deserialization; agents never
//! reject a message for carrying more than they understand.

use serde::{Deserialize, Serialize};

use crate::form::Form;
use crate::routing::Route;

/// The discriminator values of [`Payload`], used wherever a message
/// refers to another message's type (`ack_type`, trace records).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Ping,
    Acknowledgement,
    Advertisement,
    MessagesRequest,
    MessagesResponse,
    TicketRequest,
    TicketResponse,
    TicketTraceResponse,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageKind::Ping => "PING",
            MessageKind::Acknowledgement => "ACKNOWLEDGEMENT",
            MessageKind::Advertisement => "ADVERTISEMENT",
            MessageKind::MessagesRequest => "MESSAGES_REQUEST",
            MessageKind::MessagesResponse => "MESSAGES_RESPONSE",
            MessageKind::TicketRequest => "TICKET_REQUEST",
            MessageKind::TicketResponse => "TICKET_RESPONSE",
            MessageKind::TicketTraceResponse => "TICKET_TRACE_RESPONSE",
        };
        f.write_str(name)
    }
}

/// A message on the overlay: envelope fields plus a typed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkMessage {
    #[serde(flatten)]
    pub payload: Payload,

    /// Originating agent.
    #[serde(default)]
    pub src: String,

    /// Final destination. `None` means "whoever receives this" and is
    /// rewritten to the receiving agent's own id by the router.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,

    /// Immediate sender — the agent the HTTP request actually came
    /// from, used to refresh pull-only peers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,

    /// Epoch seconds when the message was built; drives queue expiry.
    #[serde(default)]
    pub timestamp: f64,
}

/// The payload variants, discriminated by `type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload {
    Ping,
    Acknowledgement(Acknowledgement),
    Advertisement(Advertisement),
    MessagesRequest,
    MessagesResponse(MessagesResponse),
    TicketRequest(NetworkTicket),
    TicketResponse(NetworkTicket),
    TicketTraceResponse(TicketTrace),
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Ping => MessageKind::Ping,
            Payload::Acknowledgement(_) => MessageKind::Acknowledgement,
            Payload::Advertisement(_) => MessageKind::Advertisement,
            Payload::MessagesRequest => MessageKind::MessagesRequest,
            Payload::MessagesResponse(_) => MessageKind::MessagesResponse,
            Payload::TicketRequest(_) => MessageKind::TicketRequest,
            Payload::TicketResponse(_) => MessageKind::TicketResponse,
            Payload::TicketTraceResponse(_) => MessageKind::TicketTraceResponse,
        }
    }
}

/// Synthesised reply for every message the router accepts without a
/// payload-bearing response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acknowledgement {
    /// The type of the message being acknowledged.
    pub ack_type: MessageKind,

    /// Set when local processing failed; carries the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Periodic broadcast of an agent's routes and peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advertisement {
    /// The advertising agent — the gateway for every carried route.
    pub agtuuid: String,

    #[serde(default)]
    pub routes: Vec<Route>,
}

/// Reply to a MESSAGES_REQUEST: everything queued for the puller and
/// for destinations it is the best gateway toward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub messages: Vec<NetworkMessage>,
}

/// A ticket in flight: a TICKET_REQUEST heading to the executing agent
/// or a TICKET_RESPONSE heading back to the originator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkTicket {
    pub tckuuid: String,
    pub form: Form,
    pub create_time: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_time: Option<f64>,

    /// When set, every agent the ticket passes emits a trace back to
    /// the originator.
    #[serde(default)]
    pub tracing: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Breadcrumb emitted by a forwarding agent for a tracing ticket. The
/// emitting agent is the envelope `src`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketTrace {
    pub tckuuid: String,
    pub hop_time: f64,
    /// Direction of the traced leg: TICKET_REQUEST or TICKET_RESPONSE.
    pub network_ticket_type: MessageKind,
}

impl NetworkMessage {
    /// Build a message originating at `src`.
    pub fn new(payload: Payload, src: impl Into<String>, dest: Option<String>, now: f64) -> Self {
        NetworkMessage {
            payload,
            src: src.into(),
            dest,
            isrc: None,
            timestamp: now,
        }
    }

    /// The acknowledgement the router returns for `msg` when local
    /// processing produced no payload of its own.
    pub fn ack_for(msg: &NetworkMessage, error: Option<String>, now: f64) -> Self {
        NetworkMessage {
            payload: Payload::Acknowledgement(Acknowledgement {
                ack_type: msg.payload.kind(),
                error,
            }),
            src: msg.src.clone(),
            dest: msg.dest.clone(),
            isrc: None,
            timestamp: now,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_serializes_with_upper_snake_tag() {
        let msg = NetworkMessage::new(Payload::Ping, "a1", Some("b2".into()), 1000.0);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"PING""#));
        assert!(json.contains(r#""src":"a1""#));
    }

    #[test]
    fn deserialization_tolerates_extra_fields() {
        let json = r#"{"type":"PING","src":"a1","dest":"b2","timestamp":1.0,"shiny":"new"}"#;
        let msg: NetworkMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.kind(), MessageKind::Ping);
        assert_eq!(msg.dest.as_deref(), Some("b2"));
    }

    #[test]
    fn acknowledgement_round_trip() {
        let msg = NetworkMessage {
            payload: Payload::Acknowledgement(Acknowledgement {
                ack_type: MessageKind::TicketRequest,
                error: None,
            }),
            src: "a1".into(),
            dest: Some("b2".into()),
            isrc: None,
            timestamp: 5.0,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""ack_type":"TICKET_REQUEST""#));

        let back: NetworkMessage = serde_json::from_str(&json).unwrap();
        match back.payload {
            Payload::Acknowledgement(ack) => {
                assert_eq!(ack.ack_type, MessageKind::TicketRequest);
                assert!(ack.error.is_none());
            }
            other => panic!("wrong payload: {other:?}"),
        }
    }

    #[test]
    fn advertisement_carries_routes() {
        let msg = NetworkMessage::new(
            Payload::Advertisement(Advertisement {
                agtuuid: "a1".into(),
                routes: vec![Route {
                    agtuuid: "c3".into(),
                    gtwuuid: "a1".into(),
                    weight: 0,
                }],
            }),
            "a1",
            Some("b2".into()),
            0.0,
        );
        let back: NetworkMessage =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        match back.payload {
            Payload::Advertisement(ad) => {
                assert_eq!(ad.agtuuid, "a1");
                assert_eq!(ad.routes.len(), 1);
            }
            other => panic!("wrong payload: {other:?}"),
        }
    }

    #[test]
    fn messages_response_nests_whole_messages() {
        let inner = NetworkMessage::new(Payload::Ping, "a1", Some("b2".into()), 1.0);
        let msg = NetworkMessage::new(
            Payload::MessagesResponse(MessagesResponse {
                messages: vec![inner],
            }),
            "b2",
            Some("a1".into()),
            2.0,
        );
        let back: NetworkMessage =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        match back.payload {
            Payload::MessagesResponse(resp) => {
                assert_eq!(resp.messages.len(), 1);
                assert_eq!(resp.messages[0].kind(), MessageKind::Ping);
            }
            other => panic!("wrong payload: {other:?}"),
        }
    }

    #[test]
    fn message_kind_display_matches_wire_names() {
        assert_eq!(MessageKind::TicketTraceResponse.to_string(), "TICKET_TRACE_RESPONSE");
        assert_eq!(
            serde_json::to_string(&MessageKind::MessagesRequest).unwrap(),
            r#""MESSAGES_REQUEST""#
        );
    }
}
