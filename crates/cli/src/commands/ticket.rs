//! `meshwork ticket` — Remote-work tickets.

use std::time::{Duration, Instant};

use meshwork_core::form::{Form, GetPeers, TicketForm};

use super::{fmt_time, CmdResult, Context};

/// How long `--wait` polls before giving up.
const WAIT_BUDGET: Duration = Duration::from_secs(15);

pub async fn submit(
    ctx: &Context,
    dst: String,
    form_json: String,
    trace: bool,
    wait: bool,
) -> CmdResult {
    let inner: Form = serde_json::from_str(&form_json)
        .map_err(|err| format!("--form is not a valid form: {err}"))?;

    let (client, endpoint) = ctx.control()?;
    let reply = client
        .send(
            &endpoint,
            &Form::CreateTicket(TicketForm {
                tckuuid: String::new(),
                src: String::new(),
                dst,
                form: Box::new(inner),
                create_time: 0.0,
                service_time: None,
                tracing: trace,
                hops: Vec::new(),
                error: None,
            }),
        )
        .await?;

    let Form::CreateTicket(ticket) = reply else {
        return Err("unexpected reply".into());
    };
    if let Some(err) = &ticket.error {
        return Err(format!("submit failed: {err}").into());
    }
    println!("Ticket {} created", ticket.tckuuid);

    if wait {
        let ticket = wait_for_service(ctx, &ticket.tckuuid).await?;
        print_ticket(&ticket);
    }
    Ok(())
}

pub async fn read(ctx: &Context, tckuuid: String) -> CmdResult {
    let (client, endpoint) = ctx.control()?;
    let reply = client
        .send(&endpoint, &Form::ReadTicket(ticket_ref(&tckuuid)))
        .await?;

    let Form::ReadTicket(ticket) = reply else {
        return Err("unexpected reply".into());
    };
    if let Some(err) = &ticket.error {
        return Err(format!("read failed: {err}").into());
    }
    print_ticket(&ticket);
    Ok(())
}

pub async fn close(ctx: &Context, tckuuid: String) -> CmdResult {
    let (client, endpoint) = ctx.control()?;
    let reply = client
        .send(&endpoint, &Form::CloseTicket(ticket_ref(&tckuuid)))
        .await?;

    match reply.error() {
        Some(err) => Err(format!("close failed: {err}").into()),
        None => {
            println!("Ticket {tckuuid} closed");
            Ok(())
        }
    }
}

/// Poll READ_TICKET until the ticket is serviced or the budget runs
/// out. Used by `submit --wait` and the file transfer commands.
pub async fn wait_for_service(
    ctx: &Context,
    tckuuid: &str,
) -> Result<TicketForm, Box<dyn std::error::Error>> {
    let (client, endpoint) = ctx.control()?;
    let started = Instant::now();

    loop {
        let reply = client
            .send(&endpoint, &Form::ReadTicket(ticket_ref(tckuuid)))
            .await?;
        if let Form::ReadTicket(ticket) = reply {
            if let Some(err) = &ticket.error {
                return Err(format!("ticket {tckuuid} is gone: {err}").into());
            }
            if ticket.service_time.is_some() {
                return Ok(ticket);
            }
        }
        if started.elapsed() >= WAIT_BUDGET {
            return Err(format!("ticket {tckuuid} was not serviced within 15s").into());
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// A ticket form that only identifies a ticket; reads and closes
/// ignore everything but the id.
fn ticket_ref(tckuuid: &str) -> TicketForm {
    TicketForm {
        tckuuid: tckuuid.to_string(),
        src: String::new(),
        dst: String::new(),
        form: Box::new(Form::GetPeers(GetPeers::default())),
        create_time: 0.0,
        service_time: None,
        tracing: false,
        hops: Vec::new(),
        error: None,
    }
}

fn print_ticket(ticket: &TicketForm) {
    println!("Ticket {}", ticket.tckuuid);
    println!("  {} -> {}", ticket.src, ticket.dst);
    println!("  created:  {}", fmt_time(ticket.create_time));
    match ticket.service_time {
        Some(t) => println!("  serviced: {}", fmt_time(t)),
        None => println!("  serviced: (pending)"),
    }
    for hop in &ticket.hops {
        println!("  hop: {} {} at {}", hop.agtuuid, hop.type_str, fmt_time(hop.hop_time));
    }
    match serde_json::to_string_pretty(&ticket.form) {
        Ok(json) => println!("  form: {json}"),
        Err(_) => println!("  form: (unprintable)"),
    }
}
