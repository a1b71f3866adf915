//! # Meshwork Routing
//!
//! The overlay's routing state: the peer table (direct neighbours,
//! push or pull), the route table (learned indirect paths with aged
//! weights), and the store-and-forward message queue. [`Topology`]
//! ties peers and routes together for the operations that need both —
//! pruning and the distance-vector advertisement exchange.

mod peers;
mod queue;
mod routes;

pub use peers::{PeerTable, PEER_REFRESH, PEER_TIMEOUT};
pub use queue::{MessageQueue, MESSAGE_TIMEOUT};
pub use routes::{RouteTable, MAX_WEIGHT};

use meshwork_core::message::Advertisement;
use meshwork_core::routing::Route;
use meshwork_core::Clock;
use meshwork_store::{Store, StoreError};
use tracing::debug;

/// The peer and route tables of one agent, plus the operations that
/// span both.
pub struct Topology {
    pub peers: PeerTable,
    pub routes: RouteTable,
    agtuuid: String,
}

impl Topology {
    /// Bind the tables inside `mem`/`disk` and load the persistent
    /// peers into memory.
    pub fn new(
        mem: &Store,
        disk: &Store,
        agtuuid: impl Into<String>,
        clock: Clock,
    ) -> Result<Topology, StoreError> {
        let topology = Topology {
            peers: PeerTable::new(mem, disk, clock)?,
            routes: RouteTable::new(mem)?,
            agtuuid: agtuuid.into(),
        };
        topology.peers.bootstrap()?;
        Ok(topology)
    }

    pub fn agtuuid(&self) -> &str {
        &self.agtuuid
    }

    /// Drop expired peers, then every route that is unusable: gateway
    /// no longer a live peer, destination equal to this agent, or
    /// destination already a direct peer.
    pub fn prune(&self) -> Result<(), StoreError> {
        let live_peers = self.peers.sweep_expired()?;
        let direct = self.peers.ids()?;
        let agtuuid = self.agtuuid.clone();

        let removed = self.routes.retain(|route| {
            live_peers.contains(&route.gtwuuid)
                && route.agtuuid != agtuuid
                && !direct.contains(&route.agtuuid)
        })?;
        if removed > 0 {
            debug!(removed, "routes pruned");
        }
        Ok(())
    }

    /// Build this agent's advertisement: every learned route with the
    /// gateway rewritten to self, plus a weight-0 entry per direct
    /// peer. Prunes first so dead state is never advertised.
    pub fn create_route_advertisement(&self) -> Result<Advertisement, StoreError> {
        self.prune()?;

        let mut routes = Vec::new();
        for mut route in self.routes.all()? {
            route.gtwuuid = self.agtuuid.clone();
            routes.push(route);
        }
        for peer in self.peers.all()? {
            routes.push(Route {
                agtuuid: peer.agtuuid,
                gtwuuid: self.agtuuid.clone(),
                weight: 0,
            });
        }

        Ok(Advertisement {
            agtuuid: self.agtuuid.clone(),
            routes,
        })
    }

    /// Fold a neighbour's advertisement into the route table. Entries
    /// for this agent or for direct peers are ignored; everything else
    /// is learned through the advertiser at `weight + 1`, so an
    /// advertised path is always worse than a direct one.
    pub fn process_route_advertisement(
        &self,
        advertisement: &Advertisement,
    ) -> Result<(), StoreError> {
        let direct = self.peers.ids()?;
        for route in &advertisement.routes {
            if route.agtuuid == self.agtuuid || direct.contains(&route.agtuuid) {
                continue;
            }
            self.routes
                .create(&route.agtuuid, &advertisement.agtuuid, route.weight + 1)?;
        }
        self.prune()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology(agtuuid: &str) -> (Topology, Clock) {
        let clock = Clock::manual(1000.0);
        let topology = Topology::new(
            &Store::in_memory(),
            &Store::in_memory(),
            agtuuid,
            clock.clone(),
        )
        .unwrap();
        (topology, clock)
    }

    #[test]
    fn prune_drops_routes_with_dead_gateways() {
        let (topo, clock) = topology("self");
        topo.peers.create("gw", None, Some(10.0), false).unwrap();
        topo.routes.create("far", "gw", 1).unwrap();

        topo.prune().unwrap();
        assert_eq!(topo.routes.all().unwrap().len(), 1);

        clock.advance(20.0);
        topo.prune().unwrap();
        assert!(topo.routes.all().unwrap().is_empty(), "gateway expired, route must follow");
    }

    #[test]
    fn prune_drops_routes_to_self_and_to_direct_peers() {
        let (topo, _) = topology("self");
        topo.peers.create("gw", None, None, false).unwrap();
        topo.peers.create("neighbour", None, None, false).unwrap();

        topo.routes.create("self", "gw", 1).unwrap();
        topo.routes.create("neighbour", "gw", 1).unwrap();
        topo.routes.create("far", "gw", 1).unwrap();

        topo.prune().unwrap();
        let remaining = topo.routes.all().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].agtuuid, "far");
    }

    #[test]
    fn advertisement_carries_routes_and_peers_as_self() {
        let (topo, _) = topology("self");
        topo.peers.create("direct", None, None, false).unwrap();
        topo.peers.create("gw", None, None, false).unwrap();
        topo.routes.create("far", "gw", 4).unwrap();

        let ad = topo.create_route_advertisement().unwrap();
        assert_eq!(ad.agtuuid, "self");
        // 1 learned route + 2 peers
        assert_eq!(ad.routes.len(), 3);
        assert!(ad.routes.iter().all(|r| r.gtwuuid == "self"));

        let far = ad.routes.iter().find(|r| r.agtuuid == "far").unwrap();
        assert_eq!(far.weight, 4);
        let direct = ad.routes.iter().find(|r| r.agtuuid == "direct").unwrap();
        assert_eq!(direct.weight, 0);
    }

    #[test]
    fn processing_adds_one_to_advertised_weights() {
        let (topo, _) = topology("a");
        topo.peers.create("b", None, None, false).unwrap();

        topo.process_route_advertisement(&Advertisement {
            agtuuid: "b".into(),
            routes: vec![Route {
                agtuuid: "c".into(),
                gtwuuid: "b".into(),
                weight: 0,
            }],
        })
        .unwrap();

        let routes = topo.routes.all().unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].agtuuid, "c");
        assert_eq!(routes[0].gtwuuid, "b");
        assert_eq!(routes[0].weight, 1);
    }

    #[test]
    fn processing_skips_self_and_direct_peers() {
        let (topo, _) = topology("a");
        topo.peers.create("b", None, None, false).unwrap();
        topo.peers.create("d", None, None, false).unwrap();

        topo.process_route_advertisement(&Advertisement {
            agtuuid: "b".into(),
            routes: vec![
                Route { agtuuid: "a".into(), gtwuuid: "b".into(), weight: 0 },
                Route { agtuuid: "d".into(), gtwuuid: "b".into(), weight: 0 },
                Route { agtuuid: "c".into(), gtwuuid: "b".into(), weight: 0 },
            ],
        })
        .unwrap();

        let routes = topo.routes.all().unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].agtuuid, "c");
    }

    #[test]
    fn replaying_an_advertisement_is_idempotent() {
        let (topo, _) = topology("a");
        topo.peers.create("b", None, None, false).unwrap();

        let ad = Advertisement {
            agtuuid: "b".into(),
            routes: vec![Route {
                agtuuid: "c".into(),
                gtwuuid: "b".into(),
                weight: 2,
            }],
        };

        topo.process_route_advertisement(&ad).unwrap();
        topo.process_route_advertisement(&ad).unwrap();

        let routes = topo.routes.all().unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].weight, 3, "identical replay must not change the weight");
    }
}
