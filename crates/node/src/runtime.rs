//! The runtime context.
//!
//! Everything that used to be a process-wide singleton in systems like
//! this — the shared in-memory store, the timer registry, the identity —
//! lives in one [`Runtime`] value built at startup and threaded through
//! the router and workers. Tests build private runtimes with manual
//! clocks and in-memory "persistent" stores.

use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use meshwork_client::MessageClient;
use meshwork_config::Identity;
use meshwork_core::message::NetworkMessage;
use meshwork_core::{Clock, Error};
use meshwork_crypto::SecretKey;
use meshwork_routing::{MessageQueue, Topology};
use meshwork_scheduler::Scheduler;
use meshwork_store::Store;
use tokio::sync::mpsc;
use tracing::warn;

use crate::tickets::TicketEngine;

/// Tunables. Defaults match the constants the protocol was built
/// around; tests shrink them.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Seconds an unserviced ticket (and its trace marks) lives.
    /// Sensible range 60–3600.
    pub ticket_timeout: f64,
    /// Size of the bounded forward pool's channel; submissions beyond
    /// it are dropped and counted.
    pub forward_queue: usize,
    /// Number of forward workers draining that channel.
    pub forward_workers: usize,
    /// Upper bound of the advertisement worker's random period.
    pub ad_period_max_secs: u64,
    pub poll_period: Duration,
    pub replay_period: Duration,
    pub ticket_sweep_period: Duration,
    pub message_sweep_period: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            ticket_timeout: 60.0,
            forward_queue: 256,
            forward_workers: 4,
            ad_period_max_secs: 30,
            poll_period: Duration::from_secs(1),
            replay_period: Duration::from_secs(1),
            ticket_sweep_period: Duration::from_secs(1),
            message_sweep_period: Duration::from_secs(60),
        }
    }
}

/// Running totals the workers maintain.
#[derive(Debug, Default)]
pub struct Counters {
    pub forwards_dropped: AtomicU64,
    pub messages_expired: AtomicU64,
    pub tickets_expired: AtomicU64,
    pub traces_expired: AtomicU64,
}

/// One agent's overlay runtime.
pub struct Runtime {
    pub identity: Identity,
    pub key: SecretKey,
    pub clock: Clock,
    pub config: RuntimeConfig,
    pub topology: Topology,
    pub queue: MessageQueue,
    pub tickets: TicketEngine,
    pub scheduler: Arc<Scheduler>,
    pub client: MessageClient,
    pub counters: Counters,
    forward_tx: mpsc::Sender<NetworkMessage>,
    forward_rx: Mutex<Option<mpsc::Receiver<NetworkMessage>>>,
}

impl Runtime {
    /// Assemble a runtime over the given stores. `mem` holds every
    /// volatile table (routes, queue, tickets, traces, the in-memory
    /// peer view); `disk` holds the persistent peer table.
    pub fn new(
        identity: Identity,
        mem: Store,
        disk: Store,
        clock: Clock,
        config: RuntimeConfig,
    ) -> Result<Arc<Runtime>, Error> {
        let key = SecretKey::from_digest(&identity.secret_digest)
            .map_err(|e| Error::Envelope(e.to_string()))?;

        let topology = Topology::new(&mem, &disk, identity.agtuuid.clone(), clock.clone())
            .map_err(Error::store)?;
        let queue = MessageQueue::new(&mem, clock.clone()).map_err(Error::store)?;
        let tickets =
            TicketEngine::new(&mem, clock.clone(), config.ticket_timeout).map_err(Error::store)?;

        let (forward_tx, forward_rx) = mpsc::channel(config.forward_queue.max(1));
        let client = MessageClient::new(key.clone(), identity.agtuuid.clone());

        Ok(Arc::new(Runtime {
            identity,
            key,
            clock,
            config,
            topology,
            queue,
            tickets,
            scheduler: Scheduler::new(),
            client,
            counters: Counters::default(),
            forward_tx,
            forward_rx: Mutex::new(Some(forward_rx)),
        }))
    }

    pub fn agtuuid(&self) -> &str {
        &self.identity.agtuuid
    }

    /// Hand a message to the forward pool. Never blocks: when the pool
    /// is saturated the message is dropped, counted, and logged.
    pub fn submit_forward(&self, message: NetworkMessage) {
        if self.forward_tx.try_send(message).is_err() {
            self.counters
                .forwards_dropped
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            warn!("forward pool saturated, dropping message");
        }
    }

    /// Take the forward channel's receive side; `None` after the pool
    /// has already been started once.
    pub(crate) fn take_forward_rx(&self) -> Option<mpsc::Receiver<NetworkMessage>> {
        self.forward_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Stop the periodic workers. In-flight HTTP exchanges and forward
    /// workers finish on their own.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use meshwork_crypto::secret_digest;

    /// A loopback runtime over in-memory stores and a manual clock.
    pub fn runtime(agtuuid: &str, start: f64) -> (Arc<Runtime>, Clock) {
        let clock = Clock::manual(start);
        let identity = Identity {
            agtuuid: agtuuid.to_string(),
            socket_host: "127.0.0.1".to_string(),
            socket_port: 0,
            secret_digest: secret_digest("changeme"),
        };
        let rt = Runtime::new(
            identity,
            Store::in_memory(),
            Store::in_memory(),
            clock.clone(),
            RuntimeConfig::default(),
        )
        .expect("runtime construction");
        (rt, clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshwork_core::message::Payload;

    #[tokio::test]
    async fn forward_pool_drops_and_counts_when_saturated() {
        let (rt, _) = testutil::runtime("a1", 0.0);
        // Nobody is draining the channel; overflow it
        for _ in 0..(rt.config.forward_queue + 10) {
            rt.submit_forward(NetworkMessage::new(
                Payload::Ping,
                "a1",
                Some("b2".into()),
                0.0,
            ));
        }
        let dropped = rt
            .counters
            .forwards_dropped
            .load(std::sync::atomic::Ordering::Relaxed);
        assert_eq!(dropped, 10);
    }

    #[tokio::test]
    async fn forward_rx_can_only_be_taken_once() {
        let (rt, _) = testutil::runtime("a1", 0.0);
        assert!(rt.take_forward_rx().is_some());
        assert!(rt.take_forward_rx().is_none());
    }
}
