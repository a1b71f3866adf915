//! Periodic workers.
//!
//! Each worker is a named one-shot timer that re-registers itself at
//! the tail of every run, so a shutdown between runs simply ends the
//! loop. The set:
//!
//! - **advertise** (random 0–30 s): age routes by the elapsed period,
//!   then send an advertisement to every peer.
//! - **poll** (1 s): MESSAGES_REQUEST to every peer with a URL and the
//!   polling flag; returned messages are routed individually.
//! - **replay** (1 s): pop everything queued and route it again, so
//!   delivery retries until a route appears or expiry wins.
//! - **message sweep** (60 s): destroy queued messages older than 60 s.
//! - **ticket sweep** (1 s): destroy tickets and trace marks past the
//!   ticket timeout.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use meshwork_core::message::{NetworkMessage, Payload};
use rand::Rng;
use tracing::{debug, warn};

use crate::forward::spawn_forward_workers;
use crate::router;
use crate::runtime::Runtime;

/// Start the forward pool and every periodic worker.
pub fn start_workers(rt: &Arc<Runtime>) {
    spawn_forward_workers(rt);
    start_ad_worker(rt.clone());
    start_poll_worker(rt.clone());
    start_replay_worker(rt.clone());
    start_message_sweep(rt.clone());
    start_ticket_sweep(rt.clone());
}

fn start_ad_worker(rt: Arc<Runtime>) {
    let period = rand::thread_rng().gen_range(1..=rt.config.ad_period_max_secs.max(1));
    let Some(timer) = rt.scheduler.register("advertise", Duration::from_secs(period), {
        let rt = rt.clone();
        async move {
            advertise_once(&rt, period as i64);
            start_ad_worker(rt);
        }
    }) else {
        return;
    };
    timer.start();
}

/// Age the routes by the period that just elapsed, then advertise to
/// every current peer.
fn advertise_once(rt: &Arc<Runtime>, elapsed: i64) {
    if let Err(err) = rt.topology.routes.age(elapsed) {
        warn!(%err, "route aging failed");
    }

    let advertisement = match rt.topology.create_route_advertisement() {
        Ok(ad) => ad,
        Err(err) => {
            warn!(%err, "advertisement build failed");
            return;
        }
    };
    let peers = match rt.topology.peers.all() {
        Ok(peers) => peers,
        Err(err) => {
            warn!(%err, "peer listing failed");
            return;
        }
    };

    let now = rt.clock.now();
    for peer in peers {
        let message = NetworkMessage::new(
            Payload::Advertisement(advertisement.clone()),
            rt.agtuuid().to_string(),
            Some(peer.agtuuid.clone()),
            now,
        );
        let rt = rt.clone();
        tokio::spawn(async move {
            router::route(&rt, message).await;
        });
    }
}

fn start_poll_worker(rt: Arc<Runtime>) {
    let period = rt.config.poll_period;
    let Some(timer) = rt.scheduler.register("poll", period, {
        let rt = rt.clone();
        async move {
            poll_once(&rt);
            start_poll_worker(rt);
        }
    }) else {
        return;
    };
    timer.start();
}

fn poll_once(rt: &Arc<Runtime>) {
    let peers = match rt.topology.peers.pollable() {
        Ok(peers) => peers,
        Err(err) => {
            warn!(%err, "peer listing failed");
            return;
        }
    };

    for peer in peers {
        let Some(url) = peer.url.clone() else { continue };
        let rt = rt.clone();
        tokio::spawn(async move {
            let request = NetworkMessage::new(
                Payload::MessagesRequest,
                rt.agtuuid().to_string(),
                None,
                rt.clock.now(),
            );
            match rt.client.send(&url, &request).await {
                Ok(reply) => match reply.payload {
                    Payload::MessagesResponse(response) => {
                        for message in response.messages {
                            let rt = rt.clone();
                            tokio::spawn(async move {
                                router::route(&rt, message).await;
                            });
                        }
                    }
                    Payload::Acknowledgement(ack) => {
                        if let Some(err) = ack.error {
                            warn!(peer = %peer.agtuuid, %err, "poll acknowledged with error");
                        }
                    }
                    other => {
                        debug!(peer = %peer.agtuuid, kind = %other.kind(), "unexpected poll reply");
                    }
                },
                Err(err) => debug!(peer = %peer.agtuuid, %err, "poll failed"),
            }
        });
    }
}

fn start_replay_worker(rt: Arc<Runtime>) {
    let period = rt.config.replay_period;
    let Some(timer) = rt.scheduler.register("replay", period, {
        let rt = rt.clone();
        async move {
            replay_once(&rt);
            start_replay_worker(rt);
        }
    }) else {
        return;
    };
    timer.start();
}

/// Give every queued message another trip through the router. What
/// still cannot be delivered simply queues again with its original
/// timestamp, so expiry keeps its meaning.
fn replay_once(rt: &Arc<Runtime>) {
    let messages = match rt.queue.drain() {
        Ok(messages) => messages,
        Err(err) => {
            warn!(%err, "queue drain failed");
            return;
        }
    };
    for message in messages {
        debug!(src = %message.src, kind = %message.kind(), dest = message.dest.as_deref().unwrap_or("-"), "replaying");
        let rt = rt.clone();
        tokio::spawn(async move {
            router::route(&rt, message).await;
        });
    }
}

fn start_message_sweep(rt: Arc<Runtime>) {
    let period = rt.config.message_sweep_period;
    let Some(timer) = rt.scheduler.register("message-sweep", period, {
        let rt = rt.clone();
        async move {
            match rt.queue.sweep_expired() {
                Ok(expired) if expired > 0 => {
                    rt.counters
                        .messages_expired
                        .fetch_add(expired as u64, Ordering::Relaxed);
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "message sweep failed"),
            }
            start_message_sweep(rt);
        }
    }) else {
        return;
    };
    timer.start();
}

fn start_ticket_sweep(rt: Arc<Runtime>) {
    let period = rt.config.ticket_sweep_period;
    let Some(timer) = rt.scheduler.register("ticket-sweep", period, {
        let rt = rt.clone();
        async move {
            match rt.tickets.sweep_expired() {
                Ok((tickets, traces)) => {
                    if tickets > 0 {
                        rt.counters
                            .tickets_expired
                            .fetch_add(tickets as u64, Ordering::Relaxed);
                    }
                    if traces > 0 {
                        rt.counters
                            .traces_expired
                            .fetch_add(traces as u64, Ordering::Relaxed);
                    }
                }
                Err(err) => warn!(%err, "ticket sweep failed"),
            }
            start_ticket_sweep(rt);
        }
    }) else {
        return;
    };
    timer.start();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testutil::runtime;

    #[tokio::test]
    async fn advertise_once_routes_an_ad_to_each_peer() {
        let (rt, _) = runtime("a1", 1000.0);
        spawn_forward_workers(&rt);
        rt.topology.peers.create("b2", None, None, false).unwrap();
        rt.topology.peers.create("c3", None, None, false).unwrap();

        advertise_once(&rt, 5);
        // Give the routing tasks and forward workers a chance to run
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Both peers are pull-only, so the ads land in the queue
        let mut dests = Vec::new();
        for message in rt.queue.drain().unwrap() {
            assert!(matches!(message.payload, Payload::Advertisement(_)));
            dests.push(message.dest.unwrap_or_default());
        }
        dests.sort();
        assert_eq!(dests, vec!["b2", "c3"]);
    }

    #[tokio::test]
    async fn advertise_once_ages_routes_first() {
        let (rt, _) = runtime("a1", 1000.0);
        rt.topology.peers.create("b2", None, None, false).unwrap();
        rt.topology.routes.create("c3", "b2", 1).unwrap();

        advertise_once(&rt, 7);
        let route = rt.topology.routes.best_gateway("c3").unwrap().unwrap();
        assert_eq!(route.weight, 8);
    }

    #[tokio::test]
    async fn replay_requeues_undeliverable_messages() {
        let (rt, _) = runtime("a1", 1000.0);
        rt.queue
            .push(NetworkMessage::new(
                Payload::Ping,
                "a1",
                Some("nowhere".into()),
                1000.0,
            ))
            .unwrap();

        replay_once(&rt);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // route() handed it to the forward pool; it is out of the
        // queue until forwarding gives up again
        let mut rx = rt.take_forward_rx().unwrap();
        let replayed = rx.try_recv().unwrap();
        assert_eq!(replayed.dest.as_deref(), Some("nowhere"));
        assert_eq!(replayed.timestamp, 1000.0, "replay must keep the original timestamp");
    }
}
