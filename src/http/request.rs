//! Parsed request heads and CONNECT targets.
//!
//! # Responsibilities
//! - Hold the owned result of parsing a request head
//! - Split a CONNECT authority into host and port
//! - Case-insensitive header access for interceptors

use std::fmt;

use crate::error::{Result, TunnelError};

/// The `CONNECT` method token.
pub const CONNECT: &str = "CONNECT";

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// First value for `name`, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Append a header, keeping any existing ones with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Remove every header named `name`. Returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.0.len();
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.0.len()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// A fully parsed request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    /// Raw request-target as sent by the client.
    pub target: String,
    /// HTTP minor version (0 or 1).
    pub version: u8,
    pub headers: Headers,
}

impl RequestHead {
    pub fn is_connect(&self) -> bool {
        self.method == CONNECT
    }

    /// True when the head announces a message body.
    pub fn declares_body(&self) -> bool {
        if self.headers.contains("transfer-encoding") {
            return true;
        }
        match self.headers.get("content-length") {
            Some(len) => len.trim() != "0",
            None => false,
        }
    }
}

/// Destination of a CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Host name or IP literal, without IPv6 brackets.
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse an authority-form request-target (`host:port`, `[v6]:port`).
    pub fn parse(authority: &str) -> Result<Self> {
        let malformed = || TunnelError::MalformedRequest(format!("invalid authority: {authority:?}"));

        let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
            let (host, rest) = rest.split_once(']').ok_or_else(malformed)?;
            let port = rest.strip_prefix(':').ok_or_else(malformed)?;
            (host, port)
        } else {
            let (host, port) = authority.rsplit_once(':').ok_or_else(malformed)?;
            if host.contains(':') {
                return Err(malformed());
            }
            (host, port)
        };

        if host.is_empty() || host.contains(['/', '@', ' ']) {
            return Err(malformed());
        }
        let port: u16 = port.parse().map_err(|_| malformed())?;
        if port == 0 {
            return Err(malformed());
        }

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
