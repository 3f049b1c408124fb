//! Semantic checks run after deserialization.
//!
//! Returns every problem found, not just the first one.

use thiserror::Error;

use crate::config::schema::AgentConfig;
use crate::security::access_control::Network;

/// A single semantic problem in a loaded configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("port.segment_size must be greater than zero")]
    ZeroSegmentSize,
    #[error("port.queue_capacity must be greater than zero")]
    ZeroQueueCapacity,
    #[error("port.wake_delay_ms must be greater than zero")]
    ZeroWakeDelay,
    #[error("port.only_from entry '{0}' is not an address or network")]
    BadOnlyFrom(String),
    #[error("observability.metrics_address '{0}' is not a socket address")]
    BadMetricsAddress(String),
}

/// One line listing every error, for `Display` impls.
pub(crate) fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validate a configuration, collecting all errors.
pub fn validate_config(config: &AgentConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let port = &config.port;

    if port.segment_size == 0 {
        errors.push(ValidationError::ZeroSegmentSize);
    }
    if port.queue_capacity == 0 {
        errors.push(ValidationError::ZeroQueueCapacity);
    }
    if port.wake_delay_ms == 0 {
        errors.push(ValidationError::ZeroWakeDelay);
    }
    for entry in &port.only_from {
        if entry.parse::<Network>().is_err() {
            errors.push(ValidationError::BadOnlyFrom(entry.clone()));
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::BadMetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
