//! `meshwork init` — Seed the agent's kvstore.

use serde_json::json;

use super::{CmdResult, Context};

pub fn run(
    ctx: &Context,
    host: Option<String>,
    port: Option<u16>,
    secret: Option<String>,
) -> CmdResult {
    let kvstore = ctx.kvstore()?;

    if let Some(host) = host {
        kvstore.set("socket_host", json!(host))?;
    }
    if let Some(port) = port {
        kvstore.set("socket_port", json!(port))?;
    }
    if let Some(secret) = secret {
        kvstore.set("secret_digest", json!(meshwork_crypto::secret_digest(&secret)))?;
    }

    // Fills in whatever was not provided
    let identity = meshwork_config::Identity::load(&kvstore)?;

    println!("Meshwork agent initialized");
    println!("  Data dir: {}", ctx.data_dir.display());
    println!("  Agent id: {}", identity.agtuuid);
    println!("  Bind:     {}", identity.bind_addr());
    Ok(())
}
