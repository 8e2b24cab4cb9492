//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (fan-out, retry budget, timeouts)
//! - Check that the header list yields at least one name
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SwitcherConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::SwitcherConfig;
use crate::detection::HeaderNames;

/// Upper bound on probe fan-out per round.
pub const MAX_SEEK_REQUESTS: usize = 64;

/// Upper bound on the switch loop retry budget.
pub const MAX_RELOADS_LIMIT: u32 = 10_000;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("header_names contains no header name")]
    NoHeaderNames,

    #[error("seek_requests must be between 1 and {max}, got {0}", max = MAX_SEEK_REQUESTS)]
    SeekRequestsOutOfRange(usize),

    #[error("max_reloads must not exceed {max}, got {0}", max = MAX_RELOADS_LIMIT)]
    MaxReloadsTooLarge(u32),

    #[error("probe.timeout_secs must be greater than 0")]
    ZeroProbeTimeout,

    #[error("observability.metrics_address is not a socket address: {0}")]
    InvalidMetricsAddress(String),
}

pub fn validate_config(config: &SwitcherConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if HeaderNames::parse(&config.header_names).is_empty() {
        errors.push(ValidationError::NoHeaderNames);
    }

    if config.seek_requests == 0 || config.seek_requests > MAX_SEEK_REQUESTS {
        errors.push(ValidationError::SeekRequestsOutOfRange(config.seek_requests));
    }

    if config.max_reloads > MAX_RELOADS_LIMIT {
        errors.push(ValidationError::MaxReloadsTooLarge(config.max_reloads));
    }

    if config.probe.timeout_secs == 0 {
        errors.push(ValidationError::ZeroProbeTimeout);
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
