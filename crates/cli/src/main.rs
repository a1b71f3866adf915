//! Meshwork CLI — the main entry point.
//!
//! Commands:
//! - `init`    — Seed the agent's kvstore (id, bind address, secret)
//! - `daemon`  — Run the agent: HTTP front plus periodic workers
//! - `peer`    — Discover, create, delete, and list peers
//! - `route`   — Inspect the learned route table
//! - `ticket`  — Submit, read, and close remote-work tickets
//! - `file`    — Push and fetch files through tickets
//!
//! Admin commands talk to the local agent's `/control` endpoint over
//! the same encrypted envelope the mesh itself uses.

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "meshwork",
    about = "Meshwork — encrypted overlay mesh for long-lived agents",
    version,
    long_about = "Meshwork agents discover one another, learn multi-hop routes, queue \
traffic for peers they cannot push to, and execute remote work tickets. \
One binary runs the daemon and administers it."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory (default: $MESHWORK_HOME or ~/.meshwork)
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// Control endpoint URL (default: the local agent's)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed the agent's identity and configuration
    Init {
        /// Bind host
        #[arg(long)]
        host: Option<String>,

        /// Bind port
        #[arg(long)]
        port: Option<u16>,

        /// Shared-secret passphrase for the whole mesh
        #[arg(long)]
        secret: Option<String>,
    },

    /// Run the agent daemon
    Daemon,

    /// Manage the peer table
    Peer {
        #[command(subcommand)]
        action: PeerAction,
    },

    /// Inspect the route table
    Route {
        #[command(subcommand)]
        action: RouteAction,
    },

    /// Manage remote-work tickets
    Ticket {
        #[command(subcommand)]
        action: TicketAction,
    },

    /// Move files through the mesh
    File {
        #[command(subcommand)]
        action: FileAction,
    },
}

#[derive(Subcommand)]
enum PeerAction {
    /// Ping a URL, learn the agent behind it, and add it as a peer
    Discover {
        url: String,

        /// Seconds until the peer expires (default: permanent)
        #[arg(long)]
        ttl: Option<f64>,

        /// Poll the peer for queued messages
        #[arg(long)]
        polling: bool,
    },

    /// Add a peer by id
    Create {
        agtuuid: String,

        /// The peer's /mpi URL; omit for a pull-only peer
        #[arg(long)]
        peer_url: Option<String>,

        #[arg(long)]
        ttl: Option<f64>,

        #[arg(long)]
        polling: bool,
    },

    /// Delete the named peers, or every peer when none are given
    Delete { agtuuids: Vec<String> },

    /// List the current peer table
    List,
}

#[derive(Subcommand)]
enum RouteAction {
    /// List the learned routes
    List,
}

#[derive(Subcommand)]
enum TicketAction {
    /// Submit a form to run on a remote agent
    Submit {
        /// Executing agent id
        #[arg(long)]
        dst: String,

        /// The form to execute, as JSON (e.g. '{"type":"GET_PEERS"}')
        #[arg(long)]
        form: String,

        /// Collect trace hops along the path
        #[arg(long)]
        trace: bool,

        /// Poll until the ticket is serviced (15 s budget)
        #[arg(long)]
        wait: bool,
    },

    /// Read a ticket's current state
    Read { tckuuid: String },

    /// Close a ticket
    Close { tckuuid: String },
}

#[derive(Subcommand)]
enum FileAction {
    /// Send a local file to an agent's filesystem
    Push {
        local: String,
        remote: String,

        /// Executing agent (default: the local agent)
        #[arg(long)]
        dst: Option<String>,
    },

    /// Fetch a file from an agent's filesystem
    Fetch {
        remote: String,
        local: String,

        /// Executing agent (default: the local agent)
        #[arg(long)]
        dst: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let ctx = commands::Context::resolve(cli.data_dir, cli.url)?;

    match cli.command {
        Commands::Init { host, port, secret } => commands::init::run(&ctx, host, port, secret)?,
        Commands::Daemon => commands::daemon::run(&ctx).await?,

        Commands::Peer { action } => match action {
            PeerAction::Discover { url, ttl, polling } => {
                commands::peer::discover(&ctx, url, ttl, polling).await?
            }
            PeerAction::Create {
                agtuuid,
                peer_url,
                ttl,
                polling,
            } => commands::peer::create(&ctx, agtuuid, peer_url, ttl, polling).await?,
            PeerAction::Delete { agtuuids } => commands::peer::delete(&ctx, agtuuids).await?,
            PeerAction::List => commands::peer::list(&ctx).await?,
        },

        Commands::Route { action } => match action {
            RouteAction::List => commands::route::list(&ctx).await?,
        },

        Commands::Ticket { action } => match action {
            TicketAction::Submit {
                dst,
                form,
                trace,
                wait,
            } => commands::ticket::submit(&ctx, dst, form, trace, wait).await?,
            TicketAction::Read { tckuuid } => commands::ticket::read(&ctx, tckuuid).await?,
            TicketAction::Close { tckuuid } => commands::ticket::close(&ctx, tckuuid).await?,
        },

        Commands::File { action } => match action {
            FileAction::Push { local, remote, dst } => {
                commands::file::push(&ctx, local, remote, dst).await?
            }
            FileAction::Fetch { remote, local, dst } => {
                commands::file::fetch(&ctx, remote, local, dst).await?
            }
        },
    }

    Ok(())
}
