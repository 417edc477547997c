//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeout > 0, at least one process slot)
//! - Detect malformed or conflicting mount prefixes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check the configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("invalid socket address '{}'", config.listener.bind_address),
        ));
    }

    let timeout = config.cgi.timeout_secs;
    if !timeout.is_finite() || timeout <= 0.0 {
        errors.push(ValidationError::new(
            "cgi.timeout_secs",
            "must be a positive number of seconds",
        ));
    }
    if config.cgi.max_process == 0 {
        errors.push(ValidationError::new("cgi.max_process", "must be at least 1"));
    }

    let mounts = config.mounts.enabled();
    if mounts.is_empty() {
        errors.push(ValidationError::new("mounts", "at least one mount must be enabled"));
    }
    let mut seen = HashSet::new();
    for (name, prefix) in mounts {
        let field = format!("mounts.{name}");
        if !prefix.starts_with('/') {
            errors.push(ValidationError::new(&field, "must start with '/'"));
        } else if prefix.len() > 1 && prefix.ends_with('/') {
            errors.push(ValidationError::new(&field, "must not end with '/'"));
        }
        if !seen.insert(prefix) {
            errors.push(ValidationError::new(
                &field,
                format!("prefix '{prefix}' is already mounted"),
            ));
        }
    }

    if config.limits.max_body_size == 0 {
        errors.push(ValidationError::new("limits.max_body_size", "must be at least 1"));
    }
    if config.limits.request_secs == 0 {
        errors.push(ValidationError::new("limits.request_secs", "must be at least 1"));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "invalid socket address '{}'",
                config.observability.metrics_address
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
