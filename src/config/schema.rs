//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the tunnel
//! endpoint. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the CONNECT tunnel endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TunnelConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Handshake and relay tuning.
    pub tunnel: HandshakeConfig,

    /// Request interceptor policy.
    pub policy: PolicyConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8899").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8899".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Timeout configuration for the handshake and the tunnel.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed for the client to send a complete request head, in seconds.
    pub handshake_secs: u64,

    /// Upstream connection establishment timeout (DNS + TCP) in seconds.
    pub connect_secs: u64,

    /// Close an established tunnel after this many seconds with no traffic.
    /// 0 disables the idle timeout.
    pub idle_secs: u64,

    /// Time allowed for open tunnels to finish after shutdown is requested.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_secs: 10,
            connect_secs: 10,
            idle_secs: 0,
            shutdown_grace_secs: 5,
        }
    }
}

/// Handshake parsing and relay buffer settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Largest request head accepted before the connection is dropped.
    pub max_request_head_bytes: usize,

    /// Size of each socket read.
    pub read_buffer_bytes: usize,

    /// Extra headers appended to the "200 Connection established" reply,
    /// in order.
    pub established_headers: Vec<HeaderEntry>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            max_request_head_bytes: 16 * 1024,
            read_buffer_bytes: 16 * 1024,
            established_headers: Vec::new(),
        }
    }
}

/// A single header name/value pair.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

/// Interceptor policy applied to CONNECT requests before dialing upstream.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Hosts that may not be tunneled to. `*.example.com` matches subdomains.
    pub blocked_hosts: Vec<String>,

    /// Target ports that may be tunneled to. Empty allows every port.
    pub allowed_ports: Vec<u16>,

    /// Status code returned for blocked hosts.
    pub blocked_status: u16,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            blocked_hosts: Vec::new(),
            allowed_ports: Vec::new(),
            blocked_status: 403,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
