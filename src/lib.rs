//! Inbound TCP port of a monitoring agent.
//!
//! ```text
//!     peer ──▶ ┌──────────┐   ┌────────────┐   ┌──────────┐   ┌──────────────┐
//!              │ acceptor │──▶│ queue (16) │──▶│  worker  │──▶│ reply        │
//!              │ (reactor)│   │ drop newest│   │ allow-   │   │ chunked,     │
//!              └──────────┘   └────────────┘   │ list     │   │ maybe        │
//!                   ▲                          └──────────┘   │ encrypted    │
//!                   │ stop                                    └──────────────┘
//!              ┌──────────────┐
//!              │ ExternalPort │◀── start(reply) / shutdown()
//!              └──────────────┘
//! ```
//!
//! Payload generation is not part of this crate: callers pass a [`Reply`]
//! to [`ExternalPort::start`] and it is invoked once per admitted peer.

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod reply;
pub mod security;

pub use config::schema::AgentConfig;
pub use lifecycle::{ExternalPort, PortOwner, ReactorHandle};
pub use net::session::{Session, SessionError};
pub use reply::{Reply, StaticReply};
