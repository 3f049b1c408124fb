//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection (reactor thread)
//!     → listener.rs (accept loop, socket handed over in blocking mode)
//!     → queue.rs (bounded FIFO, newest dropped on overflow)
//!     → worker.rs (allow-list check, reply, close)
//!     → session.rs (chunked and optionally encrypted writes)
//!
//! Worker States:
//!     Idle → Dispatching ⇄ WaitingOnQueue → Terminating
//! ```
//!
//! # Design Decisions
//! - Accepting never blocks on reply generation
//! - Exactly one worker, so replies are produced strictly in arrival order
//! - A session is owned by exactly one stage at a time

pub mod listener;
pub mod queue;
pub mod session;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
