//! `meshwork daemon` — Run the agent.

use meshwork_core::Clock;
use meshwork_node::{start_workers, Runtime, RuntimeConfig};
use meshwork_store::Store;
use tracing::info;

use super::{CmdResult, Context};

pub async fn run(ctx: &Context) -> CmdResult {
    let identity = ctx.identity()?;
    let peers = Store::open(meshwork_config::peers_path(&ctx.data_dir));

    let rt = Runtime::new(
        identity,
        Store::in_memory(),
        peers,
        Clock::system(),
        RuntimeConfig::default(),
    )?;

    println!("Meshwork daemon starting");
    println!("  Agent id: {}", rt.identity.agtuuid);
    println!("  Bind:     {}", rt.identity.bind_addr());
    println!("  Peers:    {}", rt.topology.peers.all().map(|p| p.len()).unwrap_or(0));

    start_workers(&rt);

    let listener = tokio::net::TcpListener::bind(rt.identity.bind_addr()).await?;
    tokio::select! {
        served = meshwork_node::serve(rt.clone(), listener) => {
            served?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            rt.shutdown();
        }
    }
    Ok(())
}
