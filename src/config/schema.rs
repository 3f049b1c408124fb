//! Configuration schema definitions.
//!
//! Every field carries a default so an empty file (or no file at all) yields
//! a working agent listening on the standard port.

use serde::{Deserialize, Serialize};

use crate::net::queue::MAX_SESSION_QUEUE_LENGTH;
use crate::net::session::DEFAULT_SEGMENT_SIZE;

/// Root configuration for the agent.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Inbound port settings (bind, admission, queueing).
    pub port: PortConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Inbound port configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PortConfig {
    /// TCP port to listen on. `0` asks the OS for an ephemeral port.
    pub port: u16,

    /// Bind the IPv6 wildcard address instead of the IPv4 one.
    pub ipv6: bool,

    /// Peers allowed to receive a reply: addresses or CIDR networks.
    /// Empty means everyone is allowed.
    pub only_from: Vec<String>,

    /// Largest chunk handed to a single socket write, in bytes.
    pub segment_size: usize,

    /// Sessions waiting for the worker beyond this count are dropped.
    pub queue_capacity: usize,

    /// Upper bound on how long the worker sleeps between shutdown checks.
    pub wake_delay_ms: u64,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port: 6556,
            ipv6: false,
            only_from: Vec::new(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            queue_capacity: MAX_SESSION_QUEUE_LENGTH,
            wake_delay_ms: 500,
        }
    }
}

impl PortConfig {
    /// True when a running port must be rebuilt to pick up `other`.
    pub fn requires_restart(&self, other: &PortConfig) -> bool {
        self != other
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides it.
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Expose a Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9190".to_string(),
        }
    }
}
