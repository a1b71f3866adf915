//! The bounded forward pool.
//!
//! The router never blocks on peer I/O: it drops outbound messages into
//! an mpsc channel and a small pool of workers drains it. Delivery
//! tries, in order: a direct peer with a URL (HTTP push), a direct peer
//! without one (queue for pull), the best-weight gateway's peer, and
//! finally the anonymous queue. A failed push also queues, so no
//! message is lost before its expiry.

use std::sync::Arc;

use meshwork_core::message::{NetworkMessage, Payload};
use meshwork_core::routing::Peer;
use tracing::{debug, error, warn};

use crate::runtime::Runtime;

/// Start the pool. Call once; later calls are no-ops.
pub fn spawn_forward_workers(rt: &Arc<Runtime>) {
    let Some(rx) = rt.take_forward_rx() else {
        return;
    };
    let rx = Arc::new(tokio::sync::Mutex::new(rx));

    for worker in 0..rt.config.forward_workers.max(1) {
        let rt = rt.clone();
        let rx = rx.clone();
        tokio::spawn(async move {
            loop {
                let message = { rx.lock().await.recv().await };
                match message {
                    Some(message) => forward(&rt, message).await,
                    None => {
                        debug!(worker, "forward channel closed");
                        break;
                    }
                }
            }
        });
    }
}

/// Deliver one message as far as current knowledge allows.
pub async fn forward(rt: &Arc<Runtime>, message: NetworkMessage) {
    let Some(dest) = message.dest.clone() else {
        // Destinations are normalized before forwarding; nothing to do.
        return;
    };

    // (a)/(b) a direct peer
    match rt.topology.peers.get(&dest) {
        Ok(Some(peer)) => {
            deliver_or_queue(rt, &peer, message).await;
            return;
        }
        Ok(None) => {}
        Err(err) => warn!(%dest, %err, "peer lookup failed"),
    }

    // (c) the best-weight gateway's peer
    match rt.topology.routes.best_gateway(&dest) {
        Ok(Some(route)) => match rt.topology.peers.get(&route.gtwuuid) {
            Ok(Some(peer)) => {
                deliver_or_queue(rt, &peer, message).await;
                return;
            }
            Ok(None) => {
                debug!(%dest, gateway = %route.gtwuuid, "best gateway is not a live peer");
            }
            Err(err) => warn!(%dest, %err, "gateway lookup failed"),
        },
        Ok(None) => {}
        Err(err) => warn!(%dest, %err, "route lookup failed"),
    }

    // (d) nobody knows this destination yet
    warn!(%dest, kind = %message.kind(), "destination unknown, queueing");
    enqueue(rt, message);
}

async fn deliver_or_queue(rt: &Arc<Runtime>, peer: &Peer, message: NetworkMessage) {
    let Some(url) = &peer.url else {
        // Pull-only peer: it will come and get it.
        enqueue(rt, message);
        return;
    };

    match rt.client.send(url, &message).await {
        Ok(reply) => {
            if let Payload::Acknowledgement(ack) = reply.payload {
                if let Some(err) = ack.error {
                    error!(peer = %peer.agtuuid, %err, "peer reported an error");
                }
            }
        }
        Err(err) => {
            warn!(url, %err, "push failed, queueing for retry");
            enqueue(rt, message);
        }
    }
}

fn enqueue(rt: &Arc<Runtime>, message: NetworkMessage) {
    if let Err(err) = rt.queue.push(message) {
        error!(%err, "failed to queue message");
    }
}
