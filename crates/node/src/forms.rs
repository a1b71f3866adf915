//! The form dispatcher.
//!
//! One handler per form variant. Handlers are total: [`process_form`]
//! catches every failure and hands back the submitted form with its
//! `error` field set, so a broken handler can never take down the HTTP
//! layer or lose a ticket.

use std::sync::Arc;

use meshwork_core::form::{Form, TicketForm};
use meshwork_core::message::{NetworkMessage, NetworkTicket, Payload};
use meshwork_core::Error;
use tracing::{debug, error};

use crate::adapters;
use crate::router;
use crate::runtime::Runtime;

/// Run a form to completion. Never fails; failures ride home inside
/// the form.
pub async fn process_form(rt: &Arc<Runtime>, form: Form) -> Form {
    debug!(kind = form.kind(), "processing control form");
    let submitted = form.clone();
    match dispatch(rt, form).await {
        Ok(processed) => processed,
        Err(err) => {
            error!(kind = submitted.kind(), %err, "form handler failed");
            let mut form = submitted;
            form.set_error(err.chain_string());
            form
        }
    }
}

async fn dispatch(rt: &Arc<Runtime>, form: Form) -> Result<Form, Error> {
    match form {
        Form::CreatePeer(f) => {
            rt.topology
                .peers
                .create(&f.agtuuid, f.url.clone(), f.ttl, f.polling)
                .map_err(Error::store)?;
            Ok(Form::CreatePeer(f))
        }

        Form::DiscoverPeer(mut f) => {
            // Ping the URL; the acknowledgement's dest is the remote
            // agent's id (it rewrites a null dest to itself).
            let ping = NetworkMessage::new(
                Payload::Ping,
                rt.agtuuid().to_string(),
                None,
                rt.clock.now(),
            );
            let ack = rt
                .client
                .send(&f.url, &ping)
                .await
                .map_err(|err| Error::Handler(format!("ping {} failed: {err}", f.url)))?;
            let agtuuid = ack
                .dest
                .clone()
                .filter(|id| !id.is_empty())
                .ok_or_else(|| Error::Handler("ping acknowledgement carried no agent id".into()))?;

            rt.topology
                .peers
                .create(&agtuuid, Some(f.url.clone()), f.ttl, f.polling)
                .map_err(Error::store)?;
            f.agtuuid = Some(agtuuid);
            Ok(Form::DiscoverPeer(f))
        }

        Form::DeletePeers(f) => {
            match &f.agtuuids {
                Some(ids) => {
                    for agtuuid in ids {
                        rt.topology.peers.delete(agtuuid).map_err(Error::store)?;
                    }
                }
                None => rt.topology.peers.delete_all().map_err(Error::store)?,
            }
            Ok(Form::DeletePeers(f))
        }

        Form::GetPeers(mut f) => {
            f.peers = rt.topology.peers.all().map_err(Error::store)?;
            Ok(Form::GetPeers(f))
        }

        Form::GetRoutes(mut f) => {
            f.routes = rt.topology.routes.all().map_err(Error::store)?;
            Ok(Form::GetRoutes(f))
        }

        Form::SyncProcess(f) => Ok(Form::SyncProcess(
            adapters::process::run(&rt.clock, f).await,
        )),

        Form::LoadFile(f) => Ok(Form::LoadFile(adapters::file::load(f))),

        Form::WriteFile(f) => Ok(Form::WriteFile(adapters::file::write(f))),

        Form::CreateTicket(f) => Ok(Form::CreateTicket(create_ticket(rt, f).await?)),

        Form::ReadTicket(f) => {
            match rt.tickets.read(&f.tckuuid).map_err(Error::store)? {
                Some(ticket) => Ok(Form::ReadTicket(ticket)),
                None => {
                    // Expired or never existed; the caller reads this
                    // as the null result.
                    let mut f = f;
                    f.error = Some(format!("no such ticket {}", f.tckuuid));
                    Ok(Form::ReadTicket(f))
                }
            }
        }

        Form::CloseTicket(f) => {
            rt.tickets.close(&f.tckuuid).map_err(Error::store)?;
            Ok(Form::CloseTicket(f))
        }
    }
}

/// CREATE_TICKET: persist the caller's view, then launch the network
/// ticket toward its executor. When the destination is this agent the
/// whole round trip happens inline and the returned ticket is already
/// serviced.
async fn create_ticket(rt: &Arc<Runtime>, mut form: TicketForm) -> Result<TicketForm, Error> {
    let now = rt.clock.now();
    if form.tckuuid.is_empty() {
        form.tckuuid = meshwork_core::new_uuid();
    }
    if form.src.is_empty() {
        form.src = rt.agtuuid().to_string();
    }
    if form.dst.is_empty() {
        form.dst = rt.agtuuid().to_string();
    }
    if form.create_time == 0.0 {
        form.create_time = now;
    }

    rt.tickets.insert(&form).map_err(Error::store)?;

    let request = NetworkMessage {
        payload: Payload::TicketRequest(NetworkTicket {
            tckuuid: form.tckuuid.clone(),
            form: (*form.form).clone(),
            create_time: form.create_time,
            service_time: None,
            tracing: form.tracing,
            error: None,
        }),
        src: form.src.clone(),
        dest: Some(form.dst.clone()),
        isrc: None,
        timestamp: now,
    };
    router::route(rt, request).await;

    // Re-read: a self-addressed ticket was just serviced inline.
    Ok(rt
        .tickets
        .read(&form.tckuuid)
        .map_err(Error::store)?
        .unwrap_or(form))
}
