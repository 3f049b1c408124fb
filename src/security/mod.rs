//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Dequeued session:
//!     → access_control.rs (peer address allow-list)
//!     → reply writes through the session
//!         → encryption.rs (optional encode contract, wire marker)
//! ```
//!
//! # Design Decisions
//! - Admission is decided by the worker, never by the acceptor
//! - The cipher is pluggable; only its block size and encode call are used

pub mod access_control;
pub mod encryption;

pub use access_control::{AddressFilter, AllowList};
pub use encryption::{EncryptError, Encryptor, CRYPT_MARKER};
