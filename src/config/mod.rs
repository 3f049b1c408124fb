//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AgentConfig (validated, immutable)
//!     → SharedConfig (ArcSwap) read by the port at every start
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → new AgentConfig stored into SharedConfig
//!     → port restarted when its section changed
//! ```

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

use std::sync::Arc;

use arc_swap::ArcSwap;

pub use loader::{load_config, ConfigError};
pub use schema::{AgentConfig, LogFormat, ObservabilityConfig, PortConfig};

/// Live configuration shared between the binary and the port manager.
pub type SharedConfig = Arc<ArcSwap<AgentConfig>>;

/// Wrap a configuration for sharing.
pub fn shared(config: AgentConfig) -> SharedConfig {
    Arc::new(ArcSwap::from_pointee(config))
}
