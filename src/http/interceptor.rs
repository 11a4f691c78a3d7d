//! Request interceptors run on a complete CONNECT request before the
//! upstream leg is dialed.
//!
//! # Data Flow
//! ```text
//! ConnectRequest
//!     → interceptor[0].intercept()  ── Err(Rejection) ──→ reply + close
//!     → interceptor[1].intercept()  ── ...
//!     → Ok(ConnectRequest) → open upstream
//! ```
//!
//! Interceptors see the parsed head and target. The tunnel never forwards
//! headers upstream, so header edits are only visible to later interceptors.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::PolicyConfig;
use crate::http::request::{RequestHead, Target};
use crate::http::response::{build_closing_response, reason_phrase};

/// A CONNECT request that passed parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub head: RequestHead,
    pub target: Target,
}

/// Refusal returned by an interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: u16,
    pub reason: String,
}

impl Rejection {
    /// Reject with the standard reason phrase for `status`.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_string(),
        }
    }

    pub fn with_reason(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    /// Wire form of the rejection, always closing the connection.
    pub fn to_response(&self) -> Bytes {
        build_closing_response(self.status, &self.reason)
    }
}

/// A single step in the interceptor chain.
pub trait RequestInterceptor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Pass the request on (possibly modified) or reject it.
    fn intercept(&self, request: ConnectRequest) -> Result<ConnectRequest, Rejection>;
}

/// Ordered list of interceptors, applied first to last.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the built-in interceptors described by `policy`.
    pub fn from_policy(policy: &PolicyConfig) -> Self {
        let mut chain = Self::new();
        if !policy.blocked_hosts.is_empty() {
            chain.push(HostFilter::new(policy.blocked_hosts.clone(), policy.blocked_status));
        }
        if !policy.allowed_ports.is_empty() {
            chain.push(PortAllowlist::new(policy.allowed_ports.clone()));
        }
        chain
    }

    pub fn push<I: RequestInterceptor + 'static>(&mut self, interceptor: I) {
        self.interceptors.push(Arc::new(interceptor));
    }

    /// Append every interceptor of `other`, after the existing ones.
    pub fn extend(&mut self, other: &InterceptorChain) {
        self.interceptors.extend(other.interceptors.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run every interceptor in order, stopping at the first rejection.
    pub fn apply(&self, mut request: ConnectRequest) -> Result<ConnectRequest, Rejection> {
        for interceptor in &self.interceptors {
            request = interceptor.intercept(request).map_err(|rejection| {
                tracing::debug!(
                    interceptor = interceptor.name(),
                    status = rejection.status,
                    reason = %rejection.reason,
                    "Request rejected by interceptor"
                );
                rejection
            })?;
        }
        Ok(request)
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.interceptors.iter().map(|i| i.name()))
            .finish()
    }
}

/// Rejects tunnels to listed hosts.
///
/// Entries match exactly (ignoring case), or as `*.suffix` for any subdomain.
#[derive(Debug, Clone)]
pub struct HostFilter {
    patterns: Vec<String>,
    status: u16,
}

impl HostFilter {
    pub fn new(patterns: Vec<String>, status: u16) -> Self {
        Self {
            patterns: patterns.into_iter().map(|p| p.trim().to_ascii_lowercase()).collect(),
            status,
        }
    }

    fn is_blocked(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.patterns.iter().any(|pattern| match pattern.strip_prefix("*.") {
            Some(suffix) => host
                .strip_suffix(suffix)
                .is_some_and(|prefix| prefix.ends_with('.')),
            None => host == *pattern,
        })
    }
}

impl RequestInterceptor for HostFilter {
    fn name(&self) -> &str {
        "host_filter"
    }

    fn intercept(&self, request: ConnectRequest) -> Result<ConnectRequest, Rejection> {
        if self.is_blocked(&request.target.host) {
            return Err(Rejection::new(self.status));
        }
        Ok(request)
    }
}

/// Only permits tunnels to the listed ports.
#[derive(Debug, Clone)]
pub struct PortAllowlist {
    ports: Vec<u16>,
}

impl PortAllowlist {
    pub fn new(ports: Vec<u16>) -> Self {
        Self { ports }
    }
}

impl RequestInterceptor for PortAllowlist {
    fn name(&self) -> &str {
        "port_allowlist"
    }

    fn intercept(&self, request: ConnectRequest) -> Result<ConnectRequest, Rejection> {
        if !self.ports.contains(&request.target.port) {
            return Err(Rejection::with_reason(
                403,
                format!("Port {} not allowed", request.target.port),
            ));
        }
        Ok(request)
    }
}
