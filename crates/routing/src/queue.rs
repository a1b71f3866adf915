//! Store-and-forward message queue.
//!
//! Messages land here whenever they cannot be pushed right now: the
//! destination peer has no URL, the push failed, or nobody knows the
//! destination yet. They leave through [`MessageQueue::pop`] (the
//! replay worker and MESSAGES_REQUEST servicing) or through the expiry
//! sweep.

use meshwork_core::message::NetworkMessage;
use meshwork_core::Clock;
use meshwork_store::{Collection, Query, Store, StoreError};
use tracing::{debug, warn};

use crate::Topology;

/// Seconds a queued message lives before the sweep destroys it.
pub const MESSAGE_TIMEOUT: f64 = 60.0;

pub struct MessageQueue {
    messages: Collection,
    clock: Clock,
}

impl MessageQueue {
    pub fn new(mem: &Store, clock: Clock) -> Result<MessageQueue, StoreError> {
        let messages = mem.collection("messages");
        messages.create_attribute("dest", "/dest")?;
        messages.create_attribute("type", "/type")?;
        messages.create_attribute("timestamp", "/timestamp")?;
        Ok(MessageQueue { messages, clock })
    }

    /// Enqueue a message. A zeroed timestamp is stamped with now so
    /// expiry always has something to measure against.
    pub fn push(&self, mut message: NetworkMessage) -> Result<(), StoreError> {
        if message.timestamp == 0.0 {
            message.timestamp = self.clock.now();
        }
        debug!(
            src = %message.src,
            kind = %message.kind(),
            dest = message.dest.as_deref().unwrap_or("-"),
            "message queued"
        );
        self.messages.upsert(&message)?;
        Ok(())
    }

    /// Atomically return-and-delete every message matching the query.
    pub fn pop(&self, query: &Query) -> Result<Vec<NetworkMessage>, StoreError> {
        self.messages.pop_as(query)
    }

    /// Drain everything queued, oldest state first. The replay worker
    /// re-routes what this returns.
    pub fn drain(&self) -> Result<Vec<NetworkMessage>, StoreError> {
        self.messages.pop_as(&Query::new())
    }

    /// Everything queued for `agtuuid` — directly, or addressed to any
    /// destination whose best gateway is `agtuuid`. This is how a
    /// pull-only peer receives traffic for the agents behind it.
    pub fn pull(
        &self,
        topology: &Topology,
        agtuuid: &str,
    ) -> Result<Vec<NetworkMessage>, StoreError> {
        let mut dests = vec![agtuuid.to_string()];
        for (dest, route) in topology.routes.best_gateway_map()? {
            if route.gtwuuid == agtuuid {
                dests.push(dest);
            }
        }

        let mut pulled = Vec::new();
        for dest in dests {
            pulled.extend(self.pop(&Query::new().filter("dest", dest.as_str()))?);
        }
        Ok(pulled)
    }

    /// Destroy messages older than [`MESSAGE_TIMEOUT`]; returns how
    /// many were dropped.
    pub fn sweep_expired(&self) -> Result<usize, StoreError> {
        let cutoff = self.clock.now() - MESSAGE_TIMEOUT;
        let expired = self
            .messages
            .pop_as::<NetworkMessage>(&Query::new().filter("timestamp", format!("$lt:{cutoff}")))?;
        for message in &expired {
            warn!(
                src = %message.src,
                kind = %message.kind(),
                dest = message.dest.as_deref().unwrap_or("-"),
                "queued message expired"
            );
        }
        Ok(expired.len())
    }

    pub fn len(&self) -> usize {
        self.messages.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
