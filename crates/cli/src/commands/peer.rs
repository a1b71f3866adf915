//! `meshwork peer` — Peer table administration.

use meshwork_core::form::{CreatePeer, DeletePeers, DiscoverPeer, Form, GetPeers};

use super::{fmt_time, CmdResult, Context};

pub async fn discover(ctx: &Context, url: String, ttl: Option<f64>, polling: bool) -> CmdResult {
    let (client, endpoint) = ctx.control()?;
    let reply = client
        .send(
            &endpoint,
            &Form::DiscoverPeer(DiscoverPeer {
                url,
                agtuuid: None,
                ttl,
                polling,
                error: None,
            }),
        )
        .await?;

    match reply {
        Form::DiscoverPeer(f) => match f.error {
            Some(err) => Err(format!("discover failed: {err}").into()),
            None => {
                println!("Discovered peer {}", f.agtuuid.unwrap_or_default());
                Ok(())
            }
        },
        other => Err(format!("unexpected reply: {}", other.kind()).into()),
    }
}

pub async fn create(
    ctx: &Context,
    agtuuid: String,
    url: Option<String>,
    ttl: Option<f64>,
    polling: bool,
) -> CmdResult {
    let (client, endpoint) = ctx.control()?;
    let reply = client
        .send(
            &endpoint,
            &Form::CreatePeer(CreatePeer {
                agtuuid: agtuuid.clone(),
                url,
                ttl,
                polling,
                error: None,
            }),
        )
        .await?;

    match reply.error() {
        Some(err) => Err(format!("create failed: {err}").into()),
        None => {
            println!("Peer {agtuuid} created");
            Ok(())
        }
    }
}

pub async fn delete(ctx: &Context, agtuuids: Vec<String>) -> CmdResult {
    let (client, endpoint) = ctx.control()?;
    let everything = agtuuids.is_empty();
    let reply = client
        .send(
            &endpoint,
            &Form::DeletePeers(DeletePeers {
                agtuuids: if everything { None } else { Some(agtuuids) },
                error: None,
            }),
        )
        .await?;

    match reply.error() {
        Some(err) => Err(format!("delete failed: {err}").into()),
        None => {
            println!("{}", if everything { "All peers deleted" } else { "Peers deleted" });
            Ok(())
        }
    }
}

pub async fn list(ctx: &Context) -> CmdResult {
    let (client, endpoint) = ctx.control()?;
    let reply = client
        .send(&endpoint, &Form::GetPeers(GetPeers::default()))
        .await?;

    let Form::GetPeers(f) = reply else {
        return Err("unexpected reply".into());
    };
    if let Some(err) = f.error {
        return Err(format!("list failed: {err}").into());
    }

    if f.peers.is_empty() {
        println!("No peers");
        return Ok(());
    }
    for peer in f.peers {
        let url = peer.url.as_deref().unwrap_or("(pull only)");
        let expiry = peer
            .destroy_time
            .map(fmt_time)
            .unwrap_or_else(|| "permanent".to_string());
        let polling = if peer.polling { " polling" } else { "" };
        println!("{}  {}  expires: {}{}", peer.agtuuid, url, expiry, polling);
    }
    Ok(())
}
