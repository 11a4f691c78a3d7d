//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, buffer sizes, status codes)
//! - Validate that header entries serialize into a legal status block
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TunnelConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::TunnelConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
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

/// Validate a parsed configuration.
pub fn validate_config(config: &TunnelConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }

    if config.timeouts.handshake_secs == 0 {
        errors.push(ValidationError::new("timeouts.handshake_secs", "must be > 0"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be > 0"));
    }

    // A CONNECT head needs at least a request line plus the blank line.
    if config.tunnel.max_request_head_bytes < 64 {
        errors.push(ValidationError::new(
            "tunnel.max_request_head_bytes",
            "must be at least 64",
        ));
    }
    if config.tunnel.read_buffer_bytes == 0 {
        errors.push(ValidationError::new("tunnel.read_buffer_bytes", "must be > 0"));
    }

    for (i, header) in config.tunnel.established_headers.iter().enumerate() {
        if !is_token(&header.name) {
            errors.push(ValidationError::new(
                format!("tunnel.established_headers[{}].name", i),
                format!("invalid header name: {:?}", header.name),
            ));
        }
        if header.value.contains(['\r', '\n']) {
            errors.push(ValidationError::new(
                format!("tunnel.established_headers[{}].value", i),
                "must not contain CR or LF",
            ));
        }
    }

    if !(400..=599).contains(&config.policy.blocked_status) {
        errors.push(ValidationError::new(
            "policy.blocked_status",
            "must be a 4xx or 5xx status",
        ));
    }
    for (i, host) in config.policy.blocked_hosts.iter().enumerate() {
        if host.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("policy.blocked_hosts[{}]", i),
                "must not be empty",
            ));
        }
    }
    if config.policy.allowed_ports.contains(&0) {
        errors.push(ValidationError::new("policy.allowed_ports", "port 0 is not valid"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// RFC 9110 token characters.
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}
