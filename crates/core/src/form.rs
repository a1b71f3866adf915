//! Control forms — the unit-of-work payloads.
//!
//! A form describes work for an agent: manage its peer table, inspect
//! its routes, run a process, move a file, or manage a ticket that
//! carries another form to a remote agent. Forms arrive either directly
//! on `/control` or wrapped inside a ticket on the overlay.
//!
//! The set is closed: a JSON `type` tag selects the variant, and the
//! dispatcher matches on it. Ticket forms nest another form, so the
//! whole thing is a tagged tree (boxed to keep the sum finite).

use serde::{Deserialize, Serialize};

use crate::routing::{Peer, Route};

/// The closed set of control forms, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Form {
    CreatePeer(CreatePeer),
    DiscoverPeer(DiscoverPeer),
    DeletePeers(DeletePeers),
    GetPeers(GetPeers),
    GetRoutes(GetRoutes),
    SyncProcess(SyncProcess),
    LoadFile(LoadFile),
    WriteFile(WriteFile),
    CreateTicket(TicketForm),
    ReadTicket(TicketForm),
    CloseTicket(TicketForm),
}

impl Form {
    /// Wire name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Form::CreatePeer(_) => "CREATE_PEER",
            Form::DiscoverPeer(_) => "DISCOVER_PEER",
            Form::DeletePeers(_) => "DELETE_PEERS",
            Form::GetPeers(_) => "GET_PEERS",
            Form::GetRoutes(_) => "GET_ROUTES",
            Form::SyncProcess(_) => "SYNC_PROCESS",
            Form::LoadFile(_) => "LOAD_FILE",
            Form::WriteFile(_) => "WRITE_FILE",
            Form::CreateTicket(_) => "CREATE_TICKET",
            Form::ReadTicket(_) => "READ_TICKET",
            Form::CloseTicket(_) => "CLOSE_TICKET",
        }
    }

    /// The variant's `error` field, if set.
    pub fn error(&self) -> Option<&str> {
        match self {
            Form::CreatePeer(f) => f.error.as_deref(),
            Form::DiscoverPeer(f) => f.error.as_deref(),
            Form::DeletePeers(f) => f.error.as_deref(),
            Form::GetPeers(f) => f.error.as_deref(),
            Form::GetRoutes(f) => f.error.as_deref(),
            Form::SyncProcess(f) => f.error.as_deref(),
            Form::LoadFile(f) => f.error.as_deref(),
            Form::WriteFile(f) => f.error.as_deref(),
            Form::CreateTicket(f) | Form::ReadTicket(f) | Form::CloseTicket(f) => {
                f.error.as_deref()
            }
        }
    }

    /// Record a handler failure on the form. Handlers are total: they
    /// return the form with this field set instead of propagating.
    pub fn set_error(&mut self, error: String) {
        match self {
            Form::CreatePeer(f) => f.error = Some(error),
            Form::DiscoverPeer(f) => f.error = Some(error),
            Form::DeletePeers(f) => f.error = Some(error),
            Form::GetPeers(f) => f.error = Some(error),
            Form::GetRoutes(f) => f.error = Some(error),
            Form::SyncProcess(f) => f.error = Some(error),
            Form::LoadFile(f) => f.error = Some(error),
            Form::WriteFile(f) => f.error = Some(error),
            Form::CreateTicket(f) | Form::ReadTicket(f) | Form::CloseTicket(f) => {
                f.error = Some(error)
            }
        }
    }
}

/// Upsert a peer by id, optionally with a push URL and a TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePeer {
    pub agtuuid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Seconds until the peer is pruned; absent means permanent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<f64>,

    #[serde(default)]
    pub polling: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ping a URL, learn the agent id behind it, and create the peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverPeer {
    pub url: String,

    /// Filled by the handler from the ping acknowledgement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agtuuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<f64>,

    #[serde(default)]
    pub polling: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Delete the named peers, or every peer when no list is given.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletePeers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agtuuids: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetPeers {
    /// Output: the agent's current in-memory peer table.
    #[serde(default)]
    pub peers: Vec<Peer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetRoutes {
    /// Output: the agent's current learned routes.
    #[serde(default)]
    pub routes: Vec<Route>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A command to run: a shell string or an argv list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessCommand {
    Shell(String),
    Argv(Vec<String>),
}

/// Run a subprocess to completion, killing it at `timeout` seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncProcess {
    pub command: ProcessCommand,

    #[serde(default = "default_process_timeout")]
    pub timeout: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,

    /// Exit code; `None` when the process was killed on timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_process_timeout() -> f64 {
    60.0
}

/// Read a file into the form: zlib-compressed base64 plus md5 and size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadFile {
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b64: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5sum: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Write zlib-compressed base64 content to a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFile {
    pub path: String,
    pub b64: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5sum: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The client-side view of a ticket: the form to execute, where, and
/// everything learned while it was in flight. The same body serves
/// CREATE_TICKET, READ_TICKET, and CLOSE_TICKET.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketForm {
    /// Correlation id; the CREATE_TICKET handler fills one in when the
    /// client left it empty.
    #[serde(default)]
    pub tckuuid: String,

    /// Originating agent; defaulted to the local agent.
    #[serde(default)]
    pub src: String,

    /// Executing agent; defaulted to the local agent.
    #[serde(default)]
    pub dst: String,

    /// The work to run remotely; replaced with the serviced form when
    /// the response arrives.
    pub form: Box<Form>,

    #[serde(default)]
    pub create_time: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_time: Option<f64>,

    #[serde(default)]
    pub tracing: bool,

    /// Trace breadcrumbs, one per emitting hop, in arrival order.
    #[serde(default)]
    pub hops: Vec<Hop>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One collected trace breadcrumb.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hop {
    /// The agent that emitted the trace.
    pub agtuuid: String,
    pub hop_time: f64,
    /// Direction of the traced leg, as its wire name.
    pub type_str: String,
}
