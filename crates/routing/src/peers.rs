//! The peer table: directly known neighbours.
//!
//! Peers live in two collections at once — the in-memory table the
//! router consults, and the persistent table that survives restarts.
//! Operator-created permanent peers carry no TTL; peers learned from
//! inbound traffic get `PEER_TIMEOUT` seconds and are refreshed by
//! further traffic via [`PeerTable::touch`].

use meshwork_core::routing::Peer;
use meshwork_core::Clock;
use meshwork_store::{Collection, Query, Store, StoreError};
use tracing::debug;

/// Seconds a traffic-learned peer lives without being refreshed.
pub const PEER_TIMEOUT: f64 = 120.0;
/// Seconds before inbound traffic re-extends a pull-only peer's TTL.
pub const PEER_REFRESH: f64 = 60.0;

pub struct PeerTable {
    mem: Collection,
    disk: Collection,
    clock: Clock,
}

impl PeerTable {
    /// Bind the paired collections, declaring their indices.
    pub fn new(mem: &Store, disk: &Store, clock: Clock) -> Result<PeerTable, StoreError> {
        let table = PeerTable {
            mem: mem.collection("peers"),
            disk: disk.collection("peers"),
            clock,
        };
        for collection in [&table.mem, &table.disk] {
            collection.create_attribute("agtuuid", "/agtuuid")?;
            collection.create_attribute("polling", "/polling")?;
            collection.create_attribute("url", "/url")?;
        }
        Ok(table)
    }

    /// Load the persistent peers into the in-memory table. Called once
    /// at startup.
    pub fn bootstrap(&self) -> Result<usize, StoreError> {
        let peers: Vec<Peer> = self.disk.find_as(&Query::new())?;
        let count = peers.len();
        for peer in &peers {
            self.upsert_into(&self.mem, peer)?;
        }
        Ok(count)
    }

    /// Refresh a peer we just heard from. Unknown senders become
    /// TTL-limited peers; known pull-only peers past their refresh time
    /// get their TTL extended.
    pub fn touch(&self, agtuuid: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        match self.get(agtuuid)? {
            None => {
                self.create(agtuuid, None, Some(PEER_TIMEOUT), false)?;
            }
            Some(peer) => {
                if peer.url.is_none()
                    && peer.refresh_time.map(|t| t < now).unwrap_or(false)
                {
                    self.create(agtuuid, None, Some(PEER_TIMEOUT), false)?;
                }
            }
        }
        Ok(())
    }

    /// Upsert a peer in both tables. A TTL sets `destroy_time` and
    /// `refresh_time`; its absence clears them (permanent peer).
    pub fn create(
        &self,
        agtuuid: &str,
        url: Option<String>,
        ttl: Option<f64>,
        polling: bool,
    ) -> Result<Peer, StoreError> {
        let now = self.clock.now();
        let (destroy_time, refresh_time) = match ttl {
            Some(ttl) => (Some(now + ttl), Some(now + PEER_REFRESH)),
            None => (None, None),
        };
        let peer = Peer {
            agtuuid: agtuuid.to_string(),
            url,
            polling,
            destroy_time,
            refresh_time,
        };

        self.upsert_into(&self.disk, &peer)?;
        self.upsert_into(&self.mem, &peer)?;
        debug!(agtuuid, ttl, "peer upserted");
        Ok(peer)
    }

    /// Remove one peer from both tables.
    pub fn delete(&self, agtuuid: &str) -> Result<(), StoreError> {
        for collection in [&self.mem, &self.disk] {
            for objuuid in collection.find_objuuids(&Query::new().filter("agtuuid", agtuuid))? {
                collection.remove(&objuuid)?;
            }
        }
        Ok(())
    }

    /// Remove every peer from both tables.
    pub fn delete_all(&self) -> Result<(), StoreError> {
        self.mem.clear()?;
        self.disk.clear()
    }

    /// The in-memory peer table, the view the router works from.
    pub fn all(&self) -> Result<Vec<Peer>, StoreError> {
        self.mem.find_as(&Query::new())
    }

    pub fn get(&self, agtuuid: &str) -> Result<Option<Peer>, StoreError> {
        Ok(self
            .mem
            .find_as(&Query::new().filter("agtuuid", agtuuid))?
            .into_iter()
            .next())
    }

    /// Peers this agent actively polls: a URL plus the polling flag.
    pub fn pollable(&self) -> Result<Vec<Peer>, StoreError> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|p| p.url.is_some() && p.polling)
            .collect())
    }

    /// Drop expired peers from both tables; returns the ids of the
    /// peers still alive afterwards (union of both tables).
    pub fn sweep_expired(&self) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now();
        let mut live = Vec::new();
        for collection in [&self.disk, &self.mem] {
            for (objuuid, peer) in collection.find_entries::<Peer>(&Query::new())? {
                match peer.destroy_time {
                    Some(t) if t < now => {
                        debug!(agtuuid = %peer.agtuuid, "peer expired");
                        collection.remove(&objuuid)?;
                    }
                    _ => {
                        if !live.contains(&peer.agtuuid) {
                            live.push(peer.agtuuid);
                        }
                    }
                }
            }
        }
        Ok(live)
    }

    /// Ids of the current in-memory peers.
    pub fn ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.all()?.into_iter().map(|p| p.agtuuid).collect())
    }

    fn upsert_into(&self, collection: &Collection, peer: &Peer) -> Result<(), StoreError> {
        let existing =
            collection.find_objuuids(&Query::new().filter("agtuuid", peer.agtuuid.as_str()))?;
        match existing.first() {
            Some(objuuid) => collection.upsert_at(objuuid, peer),
            None => collection.upsert(peer).map(|_| ()),
        }
    }
}
