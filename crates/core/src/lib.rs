//! # Meshwork Core
//!
//! Wire types and shared primitives for the meshwork overlay runtime.
//! This crate has **zero framework dependencies** — it defines the data
//! model that all other crates implement against.
//!
//! Everything that crosses the wire is a tagged JSON record: a
//! [`NetworkMessage`] between agents, or a [`Form`] between a client and
//! its local agent. Extra fields are tolerated on deserialization so
//! agents of slightly different vintages can interoperate.

pub mod clock;
pub mod error;
pub mod form;
pub mod message;
pub mod routing;

// Re-export key types at crate root for ergonomics
pub use clock::Clock;
pub use error::{Error, Result};
pub use form::{
    CreatePeer, DeletePeers, DiscoverPeer, Form, GetPeers, GetRoutes, Hop, LoadFile, ProcessCommand,
    SyncProcess, TicketForm, WriteFile,
};
pub use message::{
    Acknowledgement, Advertisement, MessageKind, MessagesResponse, NetworkMessage, NetworkTicket,
    Payload, TicketTrace,
};
pub use routing::{Peer, Route};

/// Generate a fresh UUIDv4 string — the id format for agents, tickets,
/// and stored objects alike.
pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
