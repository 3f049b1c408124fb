//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (port.rs):
//!     Resolve config → Build reactor → Register handle → Spawn worker → Accept
//!
//! Shutdown (port.rs + reactor.rs):
//!     Set flag → Stop reactor via handle → Join worker → Join I/O thread
//! ```
//!
//! # Design Decisions
//! - Nothing survives a run: a restart rebuilds the reactor from the current config
//! - Shutdown is idempotent and bounded by the worker's wake delay
//! - The reactor handle may be handed to an owner so it can stop the run itself

pub mod port;
pub mod reactor;

pub use port::{ExternalPort, PortError, PortOwner};
pub use reactor::{ReactorHandle, StopSignal};
