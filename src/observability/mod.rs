//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! acceptor, queue, worker, session
//!     → logging.rs (structured events keyed by connection_id)
//!     → metrics.rs (counters and the queue depth gauge)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint, when enabled
//! ```

pub mod logging;
pub mod metrics;
