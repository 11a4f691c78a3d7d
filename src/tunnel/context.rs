//! Per-configuration state shared by every connection.

use std::time::Duration;

use crate::config::TunnelConfig;
use crate::http::{InterceptorChain, ResponseTemplates};
use crate::resilience::timeouts::optional_secs;

/// Immutable settings a connection snapshots when it is accepted.
///
/// Rebuilt from scratch on config reload; never mutated in place.
#[derive(Debug, Clone)]
pub struct TunnelContext {
    pub templates: ResponseTemplates,
    pub interceptors: InterceptorChain,
    pub max_head_bytes: usize,
    pub read_buffer_bytes: usize,
    pub handshake_timeout: Duration,
    pub connect_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl TunnelContext {
    pub fn from_config(config: &TunnelConfig) -> Self {
        Self {
            templates: ResponseTemplates::new(&config.tunnel.established_headers),
            interceptors: InterceptorChain::from_policy(&config.policy),
            max_head_bytes: config.tunnel.max_request_head_bytes,
            read_buffer_bytes: config.tunnel.read_buffer_bytes,
            handshake_timeout: Duration::from_secs(config.timeouts.handshake_secs),
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            idle_timeout: optional_secs(config.timeouts.idle_secs),
        }
    }

    /// Replace the interceptor chain, e.g. to add custom interceptors.
    pub fn with_interceptors(mut self, interceptors: InterceptorChain) -> Self {
        self.interceptors = interceptors;
        self
    }
}

impl Default for TunnelContext {
    fn default() -> Self {
        Self::from_config(&TunnelConfig::default())
    }
}
