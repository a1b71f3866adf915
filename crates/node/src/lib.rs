//! # Meshwork Node
//!
//! The overlay runtime of one agent: the message router, the ticket
//! engine, the form dispatcher with its leaf adapters, the bounded
//! forward pool, the periodic workers, and the encrypted HTTP front.
//!
//! A daemon assembles one [`Runtime`], calls [`start_workers`], and
//! hands a bound listener to [`serve`]:
//!
//! ```ignore
//! let rt = Runtime::new(identity, mem, disk, Clock::system(), RuntimeConfig::default())?;
//! start_workers(&rt);
//! serve(rt, listener).await?;
//! ```

pub mod adapters;
pub mod forms;
pub mod forward;
pub mod http;
pub mod router;
pub mod runtime;
pub mod tickets;
pub mod workers;

pub use forms::process_form;
pub use forward::forward;
pub use http::{build_router, serve};
pub use router::{process, route};
pub use runtime::{Counters, Runtime, RuntimeConfig};
pub use tickets::TicketEngine;
pub use workers::start_workers;
