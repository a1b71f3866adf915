//! `meshwork file` — File transfer through the mesh.
//!
//! A push wraps a WRITE_FILE form, a fetch wraps a LOAD_FILE form.
//! With `--dst` the form rides a ticket to the executing agent;
//! without it, the local agent handles it directly.

use meshwork_core::form::{Form, LoadFile, TicketForm};
use meshwork_node::adapters::file as file_adapter;

use super::{ticket, CmdResult, Context};

pub async fn push(ctx: &Context, local: String, remote: String, dst: Option<String>) -> CmdResult {
    let data = std::fs::read(&local)?;
    let form = Form::WriteFile(file_adapter::pack(&data, remote.clone())?);

    let reply = execute(ctx, form, dst).await?;
    match reply.error() {
        Some(err) => Err(format!("push failed: {err}").into()),
        None => {
            println!("Wrote {} bytes to {remote}", data.len());
            Ok(())
        }
    }
}

pub async fn fetch(ctx: &Context, remote: String, local: String, dst: Option<String>) -> CmdResult {
    let form = Form::LoadFile(LoadFile {
        path: remote.clone(),
        b64: None,
        size: None,
        md5sum: None,
        error: None,
    });

    let reply = execute(ctx, form, dst).await?;
    let Form::LoadFile(loaded) = reply else {
        return Err("unexpected reply".into());
    };
    if let Some(err) = &loaded.error {
        return Err(format!("fetch failed: {err}").into());
    }

    let data = file_adapter::unpack(&loaded)?;
    std::fs::write(&local, &data)?;
    println!(
        "Fetched {} bytes from {remote} (md5 {})",
        data.len(),
        loaded.md5sum.as_deref().unwrap_or("-")
    );
    Ok(())
}

/// Run a form either directly on the local agent or inside a ticket on
/// a remote one, returning the serviced form.
async fn execute(
    ctx: &Context,
    form: Form,
    dst: Option<String>,
) -> Result<Form, Box<dyn std::error::Error>> {
    let (client, endpoint) = ctx.control()?;

    let Some(dst) = dst else {
        return Ok(client.send(&endpoint, &form).await?);
    };

    let reply = client
        .send(
            &endpoint,
            &Form::CreateTicket(TicketForm {
                tckuuid: String::new(),
                src: String::new(),
                dst,
                form: Box::new(form),
                create_time: 0.0,
                service_time: None,
                tracing: false,
                hops: Vec::new(),
                error: None,
            }),
        )
        .await?;
    let Form::CreateTicket(created) = reply else {
        return Err("unexpected reply".into());
    };
    if let Some(err) = &created.error {
        return Err(format!("ticket submission failed: {err}").into());
    }

    let serviced = ticket::wait_for_service(ctx, &created.tckuuid).await?;

    // Tidy up; the result is already in hand
    let _ = client
        .send(&endpoint, &Form::CloseTicket(serviced.clone()))
        .await;

    Ok(*serviced.form)
}
