//! The route table: learned indirect paths.
//!
//! Weights only move in two directions: aging adds the elapsed seconds
//! to every row, and re-learning clamps a row down to the advertised
//! minimum. A destination nobody advertises for an hour therefore ages
//! past `MAX_WEIGHT` and disappears.

use std::collections::HashMap;

use meshwork_core::routing::Route;
use meshwork_store::{Collection, Query, Store, StoreError};
use tracing::debug;

/// Cumulative aging budget before a route is destroyed.
pub const MAX_WEIGHT: i64 = 3600;

pub struct RouteTable {
    routes: Collection,
}

impl RouteTable {
    pub fn new(mem: &Store) -> Result<RouteTable, StoreError> {
        let routes = mem.collection("routes");
        routes.create_attribute("agtuuid", "/agtuuid")?;
        routes.create_attribute("gtwuuid", "/gtwuuid")?;
        routes.create_attribute("weight", "/weight")?;
        Ok(RouteTable { routes })
    }

    /// Learn (or re-learn) a route. One row per `(agtuuid, gtwuuid)`;
    /// an existing row's weight only ever moves down here.
    pub fn create(&self, agtuuid: &str, gtwuuid: &str, weight: i64) -> Result<(), StoreError> {
        let query = Query::new()
            .filter("agtuuid", agtuuid)
            .filter("gtwuuid", gtwuuid);
        let matches = self.routes.find_entries::<Route>(&query)?;

        match matches.len() {
            0 => {
                self.routes.upsert(&Route {
                    agtuuid: agtuuid.to_string(),
                    gtwuuid: gtwuuid.to_string(),
                    weight,
                })?;
            }
            1 => {
                let (objuuid, mut route) = matches.into_iter().next().expect("len checked");
                if route.weight > weight {
                    route.weight = weight;
                    self.routes.upsert_at(&objuuid, &route)?;
                }
            }
            _ => {
                // Duplicate rows should not exist; collapse them into
                // one fresh row at the incoming weight.
                for (objuuid, _) in matches {
                    self.routes.remove(&objuuid)?;
                }
                self.routes.upsert(&Route {
                    agtuuid: agtuuid.to_string(),
                    gtwuuid: gtwuuid.to_string(),
                    weight,
                })?;
            }
        }
        Ok(())
    }

    /// Add `delta` seconds to every route's weight; rows past
    /// [`MAX_WEIGHT`] are destroyed.
    pub fn age(&self, delta: i64) -> Result<(), StoreError> {
        for (objuuid, mut route) in self.routes.find_entries::<Route>(&Query::new())? {
            if route.weight > MAX_WEIGHT {
                debug!(agtuuid = %route.agtuuid, gtwuuid = %route.gtwuuid, "route aged out");
                self.routes.remove(&objuuid)?;
            } else {
                route.weight += delta;
                self.routes.upsert_at(&objuuid, &route)?;
            }
        }
        Ok(())
    }

    /// The lowest-weight gateway toward `agtuuid`, ties broken by first
    /// encountered.
    pub fn best_gateway(&self, agtuuid: &str) -> Result<Option<Route>, StoreError> {
        let mut best: Option<Route> = None;
        for route in self
            .routes
            .find_as::<Route>(&Query::new().filter("agtuuid", agtuuid))?
        {
            match &best {
                Some(current) if current.weight <= route.weight => {}
                _ => best = Some(route),
            }
        }
        Ok(best)
    }

    /// Best gateway per destination across the whole table, used by
    /// the queue's pull expansion.
    pub fn best_gateway_map(&self) -> Result<HashMap<String, Route>, StoreError> {
        let mut map: HashMap<String, Route> = HashMap::new();
        for route in self.routes.find_as::<Route>(&Query::new())? {
            match map.get(&route.agtuuid) {
                Some(current) if current.weight <= route.weight => {}
                _ => {
                    map.insert(route.agtuuid.clone(), route);
                }
            }
        }
        Ok(map)
    }

    pub fn all(&self) -> Result<Vec<Route>, StoreError> {
        self.routes.find_as(&Query::new())
    }

    /// Remove every route failing the keep predicate.
    pub fn retain(
        &self,
        mut keep: impl FnMut(&Route) -> bool,
    ) -> Result<usize, StoreError> {
        let mut removed = 0;
        for (objuuid, route) in self.routes.find_entries::<Route>(&Query::new())? {
            if !keep(&route) {
                self.routes.remove(&objuuid)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn delete(&self, agtuuid: &str, gtwuuid: &str) -> Result<(), StoreError> {
        let query = Query::new()
            .filter("agtuuid", agtuuid)
            .filter("gtwuuid", gtwuuid);
        for objuuid in self.routes.find_objuuids(&query)? {
            self.routes.remove(&objuuid)?;
        }
        Ok(())
    }
}
