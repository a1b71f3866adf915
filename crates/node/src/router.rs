//! The message router.
//!
//! [`route`] classifies every message exactly once:
//!
//! 1. refresh the immediate sender in the peer table,
//! 2. default a missing destination to this agent,
//! 3. emit a trace if a tracing ticket is passing through,
//! 4. terminate locally when we are the destination, otherwise hand the
//!    message to the forward pool and acknowledge immediately.
//!
//! Local processing never lets an error escape: any failure is folded
//! into the returned `ACKNOWLEDGEMENT`'s `error` field.

use std::sync::Arc;

use async_recursion::async_recursion;
use meshwork_core::message::{
    MessageKind, MessagesResponse, NetworkMessage, NetworkTicket, Payload, TicketTrace,
};
use meshwork_core::Error;
use tracing::{debug, error, warn};

use crate::forms;
use crate::runtime::Runtime;

/// Route one message to its conclusion, returning the reply the caller
/// (HTTP handler or worker) should see.
#[async_recursion]
pub async fn route(rt: &Arc<Runtime>, mut message: NetworkMessage) -> NetworkMessage {
    let now = rt.clock.now();

    if let Some(isrc) = message.isrc.clone() {
        if let Err(err) = rt.topology.peers.touch(&isrc) {
            warn!(%isrc, %err, "failed to refresh sending peer");
        }
    }

    if message.dest.is_none() {
        message.dest = Some(rt.agtuuid().to_string());
    }

    emit_trace_if_tracing(rt, &message);

    if message.dest.as_deref() == Some(rt.agtuuid()) {
        match process(rt, &message).await {
            Ok(Some(reply)) => reply,
            Ok(None) => NetworkMessage::ack_for(&message, None, now),
            Err(err) => {
                error!(kind = %message.kind(), %err, "local processing failed");
                NetworkMessage::ack_for(&message, Some(err.chain_string()), now)
            }
        }
    } else {
        rt.submit_forward(message.clone());
        NetworkMessage::ack_for(&message, None, now)
    }
}

/// Dispatch a message addressed to this agent. `Ok(None)` means "done,
/// acknowledge"; `Ok(Some(reply))` carries a payload-bearing response.
pub async fn process(
    rt: &Arc<Runtime>,
    message: &NetworkMessage,
) -> Result<Option<NetworkMessage>, Error> {
    debug!(kind = %message.kind(), src = %message.src, "processing message");
    match &message.payload {
        Payload::Ping => Ok(None),

        Payload::Advertisement(ad) => {
            rt.topology
                .process_route_advertisement(ad)
                .map_err(Error::store)?;
            Ok(None)
        }

        Payload::TicketRequest(ticket) => {
            // Execute the carried form, then send the same ticket back
            // with src/dest swapped as a TICKET_RESPONSE. The form
            // handler is total, so an execution failure travels home in
            // the form's error field.
            let form = forms::process_form(rt, ticket.form.clone()).await;
            let response = NetworkMessage {
                payload: Payload::TicketResponse(NetworkTicket {
                    tckuuid: ticket.tckuuid.clone(),
                    form,
                    create_time: ticket.create_time,
                    service_time: None,
                    tracing: ticket.tracing,
                    error: None,
                }),
                src: message.dest.clone().unwrap_or_else(|| rt.agtuuid().to_string()),
                dest: Some(message.src.clone()),
                isrc: None,
                timestamp: rt.clock.now(),
            };
            route(rt, response).await;
            Ok(None)
        }

        Payload::TicketResponse(ticket) => {
            rt.tickets.service(ticket).map_err(Error::store)?;
            Ok(None)
        }

        Payload::TicketTraceResponse(trace) => {
            rt.tickets
                .record_hop(&message.src, trace)
                .map_err(Error::store)?;
            Ok(None)
        }

        Payload::MessagesRequest => {
            // The puller is the immediate sender; fall back to src for
            // locally-constructed requests.
            let puller = message
                .isrc
                .clone()
                .unwrap_or_else(|| message.src.clone());
            let messages = rt
                .queue
                .pull(&rt.topology, &puller)
                .map_err(Error::store)?;
            Ok(Some(NetworkMessage {
                payload: Payload::MessagesResponse(MessagesResponse { messages }),
                src: rt.agtuuid().to_string(),
                dest: Some(puller),
                isrc: None,
                timestamp: rt.clock.now(),
            }))
        }

        Payload::Acknowledgement(ack) => {
            if let Some(err) = &ack.error {
                warn!(ack_type = %ack.ack_type, %err, "acknowledgement carried an error");
            }
            Ok(None)
        }

        Payload::MessagesResponse(_) => {
            warn!("unexpected MESSAGES_RESPONSE outside a poll exchange");
            Ok(None)
        }
    }
}

/// Step 3: a tracing TICKET_REQUEST / TICKET_RESPONSE passing this hop
/// announces itself to the ticket's originator. The announcement is
/// per-`(tckuuid, direction)`: a repeat pass refreshes the stored mark
/// without re-emitting. The originator itself emits nothing — its
/// position in the path is implicit.
fn emit_trace_if_tracing(rt: &Arc<Runtime>, message: &NetworkMessage) {
    let (ticket, direction) = match &message.payload {
        Payload::TicketRequest(t) => (t, MessageKind::TicketRequest),
        Payload::TicketResponse(t) => (t, MessageKind::TicketResponse),
        _ => return,
    };
    if !ticket.tracing {
        return;
    }

    // Requests trace back to their source, responses to their target —
    // both are the agent that created the ticket.
    let originator = match direction {
        MessageKind::TicketRequest => message.src.clone(),
        _ => message.dest.clone().unwrap_or_default(),
    };
    if originator.is_empty() || originator == rt.agtuuid() {
        return;
    }

    let now = rt.clock.now();
    match rt.tickets.mark_trace(&ticket.tckuuid, direction, now) {
        Ok(true) => {
            let trace = NetworkMessage::new(
                Payload::TicketTraceResponse(TicketTrace {
                    tckuuid: ticket.tckuuid.clone(),
                    hop_time: now,
                    network_ticket_type: direction,
                }),
                rt.agtuuid().to_string(),
                Some(originator),
                now,
            );
            rt.submit_forward(trace);
        }
        Ok(false) => {
            debug!(tckuuid = %ticket.tckuuid, %direction, "trace already announced for this leg");
        }
        Err(err) => warn!(tckuuid = %ticket.tckuuid, %err, "trace bookkeeping failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testutil::runtime;
    use meshwork_core::form::{Form, GetPeers, GetRoutes, TicketForm};
    use meshwork_core::message::{Acknowledgement, Advertisement};
    use meshwork_core::routing::Route;

    fn ping(src: &str, dest: Option<&str>) -> NetworkMessage {
        NetworkMessage::new(Payload::Ping, src, dest.map(str::to_string), 0.0)
    }

    #[tokio::test]
    async fn ping_is_acknowledged_with_its_type() {
        let (rt, _) = runtime("a1", 1000.0);
        let reply = route(&rt, ping("b2", Some("a1"))).await;
        match reply.payload {
            Payload::Acknowledgement(ack) => {
                assert_eq!(ack.ack_type, MessageKind::Ping);
                assert!(ack.error.is_none());
            }
            other => panic!("expected acknowledgement, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_dest_defaults_to_self() {
        let (rt, _) = runtime("a1", 1000.0);
        let reply = route(&rt, ping("b2", None)).await;
        // The ack mirrors the rewritten destination — this is how
        // DISCOVER_PEER learns a remote agent's id.
        assert_eq!(reply.dest.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn inbound_traffic_touches_the_sender() {
        let (rt, _) = runtime("a1", 1000.0);
        let mut msg = ping("b2", Some("a1"));
        msg.isrc = Some("b2".into());
        route(&rt, msg).await;

        let peer = rt.topology.peers.get("b2").unwrap().unwrap();
        assert!(peer.destroy_time.is_some(), "traffic-learned peers carry a TTL");
    }

    #[tokio::test]
    async fn advertisement_populates_routes() {
        let (rt, _) = runtime("a1", 1000.0);
        rt.topology.peers.create("b2", None, None, false).unwrap();

        let msg = NetworkMessage::new(
            Payload::Advertisement(Advertisement {
                agtuuid: "b2".into(),
                routes: vec![Route {
                    agtuuid: "c3".into(),
                    gtwuuid: "b2".into(),
                    weight: 0,
                }],
            }),
            "b2",
            Some("a1".into()),
            0.0,
        );
        route(&rt, msg).await;

        let best = rt.topology.routes.best_gateway("c3").unwrap().unwrap();
        assert_eq!(best.gtwuuid, "b2");
        assert_eq!(best.weight, 1);
    }

    #[tokio::test]
    async fn local_ticket_request_services_inline() {
        let (rt, _) = runtime("a1", 1000.0);
        // A ticket we originated, addressed to ourselves
        rt.tickets
            .insert(&TicketForm {
                tckuuid: "t1".into(),
                src: "a1".into(),
                dst: "a1".into(),
                form: Box::new(Form::GetPeers(GetPeers::default())),
                create_time: 1000.0,
                service_time: None,
                tracing: false,
                hops: Vec::new(),
                error: None,
            })
            .unwrap();

        let request = NetworkMessage {
            payload: Payload::TicketRequest(NetworkTicket {
                tckuuid: "t1".into(),
                form: Form::GetPeers(GetPeers::default()),
                create_time: 1000.0,
                service_time: None,
                tracing: false,
                error: None,
            }),
            src: "a1".into(),
            dest: Some("a1".into()),
            isrc: None,
            timestamp: 1000.0,
        };
        route(&rt, request).await;

        let ticket = rt.tickets.read("t1").unwrap().unwrap();
        assert!(ticket.service_time.is_some());
    }

    #[tokio::test]
    async fn foreign_destination_is_acked_and_forwarded() {
        let (rt, _) = runtime("a1", 1000.0);
        let reply = route(&rt, ping("b2", Some("z9"))).await;
        assert!(matches!(reply.payload, Payload::Acknowledgement(_)));

        // The message went to the forward pool, not the local handlers
        let mut rx = rt.take_forward_rx().unwrap();
        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.dest.as_deref(), Some("z9"));
    }

    #[tokio::test]
    async fn messages_request_answers_with_pull() {
        let (rt, _) = runtime("a1", 1000.0);
        rt.queue
            .push(ping("a1", Some("b2")))
            .unwrap();

        let mut request = NetworkMessage::new(Payload::MessagesRequest, "b2", Some("a1".into()), 0.0);
        request.isrc = Some("b2".into());
        let reply = route(&rt, request).await;

        match reply.payload {
            Payload::MessagesResponse(resp) => {
                assert_eq!(resp.messages.len(), 1);
                assert_eq!(resp.messages[0].dest.as_deref(), Some("b2"));
            }
            other => panic!("expected messages response, got {other:?}"),
        }
        assert!(rt.queue.is_empty(), "pulled messages leave the queue");
    }

    #[tokio::test]
    async fn relay_emits_one_trace_per_direction() {
        let (rt, _) = runtime("b2", 1000.0);
        let request = NetworkMessage {
            payload: Payload::TicketRequest(NetworkTicket {
                tckuuid: "t1".into(),
                form: Form::GetRoutes(GetRoutes::default()),
                create_time: 1000.0,
                service_time: None,
                tracing: true,
                error: None,
            }),
            src: "a1".into(),
            dest: Some("c3".into()),
            isrc: None,
            timestamp: 1000.0,
        };

        // Relayed twice through this hop — only one trace emitted
        route(&rt, request.clone()).await;
        route(&rt, request).await;

        let mut rx = rt.take_forward_rx().unwrap();
        let mut traces = 0;
        let mut forwards = 0;
        while let Ok(msg) = rx.try_recv() {
            match msg.payload {
                Payload::TicketTraceResponse(ref t) => {
                    traces += 1;
                    assert_eq!(msg.dest.as_deref(), Some("a1"));
                    assert_eq!(t.network_ticket_type, MessageKind::TicketRequest);
                }
                Payload::TicketRequest(_) => forwards += 1,
                other => panic!("unexpected forward: {other:?}"),
            }
        }
        assert_eq!(traces, 1);
        assert_eq!(forwards, 2);
    }

    #[tokio::test]
    async fn originator_emits_no_trace_for_its_own_ticket() {
        let (rt, _) = runtime("a1", 1000.0);
        let request = NetworkMessage {
            payload: Payload::TicketRequest(NetworkTicket {
                tckuuid: "t1".into(),
                form: Form::GetRoutes(GetRoutes::default()),
                create_time: 1000.0,
                service_time: None,
                tracing: true,
                error: None,
            }),
            src: "a1".into(),
            dest: Some("c3".into()),
            isrc: None,
            timestamp: 1000.0,
        };
        route(&rt, request).await;

        let mut rx = rt.take_forward_rx().unwrap();
        while let Ok(msg) = rx.try_recv() {
            assert!(
                !matches!(msg.payload, Payload::TicketTraceResponse(_)),
                "the originating hop must stay silent"
            );
        }
    }

    #[tokio::test]
    async fn ack_errors_are_logged_not_fatal() {
        let (rt, _) = runtime("a1", 1000.0);
        let msg = NetworkMessage {
            payload: Payload::Acknowledgement(Acknowledgement {
                ack_type: MessageKind::Ping,
                error: Some("remote failure".into()),
            }),
            src: "b2".into(),
            dest: Some("a1".into()),
            isrc: None,
            timestamp: 0.0,
        };
        let reply = route(&rt, msg).await;
        assert!(matches!(reply.payload, Payload::Acknowledgement(_)));
    }
}
