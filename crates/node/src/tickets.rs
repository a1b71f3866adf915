//! The ticket engine.
//!
//! A ticket is the caller-side record of one unit of remote work. It is
//! born OPEN with `service_time == None`, collects trace hops while the
//! request and response travel, flips to serviced when the matching
//! TICKET_RESPONSE arrives, and is destroyed by CLOSE_TICKET or by the
//! expiry sweep. The executing agent never stores the caller's ticket —
//! only the NetworkTicket passing through.
//!
//! Trace de-duplication lives here too: a `traces` collection keyed on
//! `(tckuuid, direction)` remembers which legs this agent has already
//! announced, so a replayed ticket updates the stored `hop_time` but
//! never re-emits the trace.

use serde::{Deserialize, Serialize};

use meshwork_core::form::{Hop, TicketForm};
use meshwork_core::message::{MessageKind, NetworkTicket, TicketTrace};
use meshwork_core::Clock;
use meshwork_store::{Collection, Query, Store, StoreError};
use tracing::{debug, warn};

/// A remembered trace emission for one `(tckuuid, direction)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TraceMark {
    tckuuid: String,
    network_ticket_type: MessageKind,
    hop_time: f64,
}

pub struct TicketEngine {
    tickets: Collection,
    traces: Collection,
    clock: Clock,
    timeout: f64,
}

impl TicketEngine {
    pub fn new(mem: &Store, clock: Clock, timeout: f64) -> Result<TicketEngine, StoreError> {
        let tickets = mem.collection("tickets");
        tickets.create_attribute("tckuuid", "/tckuuid")?;
        tickets.create_attribute("create_time", "/create_time")?;

        let traces = mem.collection("traces");
        traces.create_attribute("tckuuid", "/tckuuid")?;
        traces.create_attribute("network_ticket_type", "/network_ticket_type")?;
        traces.create_attribute("hop_time", "/hop_time")?;

        Ok(TicketEngine {
            tickets,
            traces,
            clock,
            timeout,
        })
    }

    /// Store a fresh ticket (OPEN, no hops).
    pub fn insert(&self, ticket: &TicketForm) -> Result<(), StoreError> {
        self.upsert(ticket)
    }

    /// The current state of a ticket, if it still exists.
    pub fn read(&self, tckuuid: &str) -> Result<Option<TicketForm>, StoreError> {
        Ok(self
            .tickets
            .find_as::<TicketForm>(&Query::new().filter("tckuuid", tckuuid))?
            .into_iter()
            .next())
    }

    /// Destroy a ticket. Returns whether one existed.
    pub fn close(&self, tckuuid: &str) -> Result<bool, StoreError> {
        let ids = self
            .tickets
            .find_objuuids(&Query::new().filter("tckuuid", tckuuid))?;
        for objuuid in &ids {
            self.tickets.remove(objuuid)?;
        }
        Ok(!ids.is_empty())
    }

    /// Apply a TICKET_RESPONSE: copy the serviced form in and stamp
    /// `service_time`. Last writer wins; a response for an expired or
    /// unknown ticket is dropped.
    pub fn service(&self, response: &NetworkTicket) -> Result<bool, StoreError> {
        let entries = self
            .tickets
            .find_entries::<TicketForm>(&Query::new().filter("tckuuid", response.tckuuid.as_str()))?;
        if entries.is_empty() {
            debug!(tckuuid = %response.tckuuid, "response for unknown ticket dropped");
            return Ok(false);
        }
        let now = self.clock.now();
        for (objuuid, mut ticket) in entries {
            ticket.form = Box::new(response.form.clone());
            ticket.service_time = Some(now);
            self.tickets.upsert_at(&objuuid, &ticket)?;
        }
        Ok(true)
    }

    /// Apply a TICKET_TRACE_RESPONSE emitted by `src`: append a hop to
    /// the ticket, if it still exists.
    pub fn record_hop(&self, src: &str, trace: &TicketTrace) -> Result<bool, StoreError> {
        let entries = self
            .tickets
            .find_entries::<TicketForm>(&Query::new().filter("tckuuid", trace.tckuuid.as_str()))?;
        if entries.is_empty() {
            debug!(tckuuid = %trace.tckuuid, "trace for unknown ticket dropped");
            return Ok(false);
        }
        for (objuuid, mut ticket) in entries {
            ticket.hops.push(Hop {
                agtuuid: src.to_string(),
                hop_time: trace.hop_time,
                type_str: trace.network_ticket_type.to_string(),
            });
            self.tickets.upsert_at(&objuuid, &ticket)?;
        }
        Ok(true)
    }

    /// Remember that this agent announced the `(tckuuid, direction)`
    /// leg. Returns `true` when the mark is fresh and the trace should
    /// be emitted; a repeat pass only refreshes the stored `hop_time`.
    pub fn mark_trace(
        &self,
        tckuuid: &str,
        direction: MessageKind,
        hop_time: f64,
    ) -> Result<bool, StoreError> {
        let query = Query::new()
            .filter("tckuuid", tckuuid)
            .filter("network_ticket_type", direction.to_string());
        let existing = self.traces.find_entries::<TraceMark>(&query)?;

        match existing.into_iter().next() {
            Some((objuuid, mut mark)) => {
                mark.hop_time = hop_time;
                self.traces.upsert_at(&objuuid, &mark)?;
                Ok(false)
            }
            None => {
                self.traces.upsert(&TraceMark {
                    tckuuid: tckuuid.to_string(),
                    network_ticket_type: direction,
                    hop_time,
                })?;
                Ok(true)
            }
        }
    }

    /// Destroy tickets and trace marks older than the timeout. Returns
    /// `(tickets, traces)` destroyed.
    pub fn sweep_expired(&self) -> Result<(usize, usize), StoreError> {
        let cutoff = self.clock.now() - self.timeout;

        let mut expired_tickets = 0;
        for (objuuid, ticket) in self
            .tickets
            .find_entries::<TicketForm>(&Query::new().filter("create_time", format!("$lt:{cutoff}")))?
        {
            warn!(tckuuid = %ticket.tckuuid, "expiring ticket");
            self.tickets.remove(&objuuid)?;
            expired_tickets += 1;
        }

        let expired_traces = self
            .traces
            .pop(&Query::new().filter("hop_time", format!("$lt:{cutoff}")))?
            .len();

        Ok((expired_tickets, expired_traces))
    }

    pub fn open_tickets(&self) -> usize {
        self.tickets.count()
    }

    fn upsert(&self, ticket: &TicketForm) -> Result<(), StoreError> {
        let existing = self
            .tickets
            .find_objuuids(&Query::new().filter("tckuuid", ticket.tckuuid.as_str()))?;
        match existing.first() {
            Some(objuuid) => self.tickets.upsert_at(objuuid, ticket),
            None => self.tickets.upsert(ticket).map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshwork_core::form::{Form, GetPeers, GetRoutes};

    fn engine(timeout: f64) -> (TicketEngine, Clock) {
        let clock = Clock::manual(1000.0);
        let engine = TicketEngine::new(&Store::in_memory(), clock.clone(), timeout).unwrap();
        (engine, clock)
    }

    fn ticket(tckuuid: &str, create_time: f64) -> TicketForm {
        TicketForm {
            tckuuid: tckuuid.to_string(),
            src: "a1".into(),
            dst: "b2".into(),
            form: Box::new(Form::GetPeers(GetPeers::default())),
            create_time,
            service_time: None,
            tracing: false,
            hops: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn insert_read_close_cycle() {
        let (engine, _) = engine(60.0);
        engine.insert(&ticket("t1", 1000.0)).unwrap();

        let read = engine.read("t1").unwrap().unwrap();
        assert!(read.service_time.is_none());
        assert!(read.hops.is_empty());

        assert!(engine.close("t1").unwrap());
        assert!(engine.read("t1").unwrap().is_none());
        assert!(!engine.close("t1").unwrap());
        assert_eq!(engine.open_tickets(), 0);
    }

    #[test]
    fn service_sets_time_and_swaps_form() {
        let (engine, _) = engine(60.0);
        engine.insert(&ticket("t1", 1000.0)).unwrap();

        let serviced = engine
            .service(&NetworkTicket {
                tckuuid: "t1".into(),
                form: Form::GetRoutes(GetRoutes::default()),
                create_time: 1000.0,
                service_time: None,
                tracing: false,
                error: None,
            })
            .unwrap();
        assert!(serviced);

        let read = engine.read("t1").unwrap().unwrap();
        assert_eq!(read.service_time, Some(1000.0));
        assert!(matches!(*read.form, Form::GetRoutes(_)));
    }

    #[test]
    fn response_for_missing_ticket_is_dropped() {
        let (engine, _) = engine(60.0);
        let serviced = engine
            .service(&NetworkTicket {
                tckuuid: "ghost".into(),
                form: Form::GetPeers(GetPeers::default()),
                create_time: 0.0,
                service_time: None,
                tracing: false,
                error: None,
            })
            .unwrap();
        assert!(!serviced);
    }

    #[test]
    fn hops_accumulate_in_arrival_order() {
        let (engine, _) = engine(60.0);
        engine.insert(&ticket("t1", 1000.0)).unwrap();

        for (src, kind) in [
            ("b2", MessageKind::TicketRequest),
            ("c3", MessageKind::TicketRequest),
            ("c3", MessageKind::TicketResponse),
        ] {
            engine
                .record_hop(
                    src,
                    &TicketTrace {
                        tckuuid: "t1".into(),
                        hop_time: 1001.0,
                        network_ticket_type: kind,
                    },
                )
                .unwrap();
        }

        let read = engine.read("t1").unwrap().unwrap();
        assert_eq!(read.hops.len(), 3);
        assert_eq!(read.hops[0].agtuuid, "b2");
        assert_eq!(read.hops[2].type_str, "TICKET_RESPONSE");
    }

    #[test]
    fn trace_marks_deduplicate_per_direction() {
        let (engine, _) = engine(60.0);

        assert!(engine.mark_trace("t1", MessageKind::TicketRequest, 1000.0).unwrap());
        // Same leg again: refreshed, not re-emitted
        assert!(!engine.mark_trace("t1", MessageKind::TicketRequest, 1005.0).unwrap());
        // Other direction is its own mark
        assert!(engine.mark_trace("t1", MessageKind::TicketResponse, 1006.0).unwrap());
        // Other ticket too
        assert!(engine.mark_trace("t2", MessageKind::TicketRequest, 1007.0).unwrap());
    }

    #[test]
    fn sweep_expires_tickets_and_marks() {
        let (engine, clock) = engine(60.0);
        engine.insert(&ticket("old", 1000.0)).unwrap();
        engine.mark_trace("old", MessageKind::TicketRequest, 1000.0).unwrap();

        clock.advance(30.0);
        engine.insert(&ticket("young", 1030.0)).unwrap();
        assert_eq!(engine.sweep_expired().unwrap(), (0, 0));

        clock.advance(45.0);
        // "old" is 75s past creation, "young" only 45s
        assert_eq!(engine.sweep_expired().unwrap(), (1, 1));
        assert!(engine.read("old").unwrap().is_none());
        assert!(engine.read("young").unwrap().is_some());

        // A late response for the expired ticket is dropped
        assert!(!engine
            .service(&NetworkTicket {
                tckuuid: "old".into(),
                form: Form::GetPeers(GetPeers::default()),
                create_time: 1000.0,
                service_time: None,
                tracing: false,
                error: None,
            })
            .unwrap());
    }
}
