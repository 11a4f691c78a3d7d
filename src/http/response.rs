//! Status-line serialization and precomputed handshake replies.
//!
//! Replies have no body. They are built once per configuration and shared
//! read-only; cloning a template only bumps a reference count.

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::HeaderEntry;

/// Serialize a bodyless HTTP/1.1 response.
pub fn build_response<'a, I>(status: u16, reason: &str, headers: I) -> Bytes
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut buf = BytesMut::with_capacity(64);
    buf.put_slice(format!("HTTP/1.1 {} {}\r\n", status, reason).as_bytes());
    for (name, value) in headers {
        buf.put_slice(name.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// A response that ends the connection once written.
pub fn build_closing_response(status: u16, reason: &str) -> Bytes {
    build_response(status, reason, [("Connection", "close")])
}

/// Replies shared by every connection served under one configuration.
#[derive(Debug, Clone)]
pub struct ResponseTemplates {
    established: Bytes,
    unsupported_scheme: Bytes,
    bad_gateway: Bytes,
    gateway_timeout: Bytes,
}

impl ResponseTemplates {
    /// Build the templates, appending `extra_headers` to the 200 reply.
    pub fn new(extra_headers: &[HeaderEntry]) -> Self {
        Self {
            established: build_response(
                200,
                "Connection established",
                extra_headers.iter().map(|h| (h.name.as_str(), h.value.as_str())),
            ),
            unsupported_scheme: build_closing_response(400, "Unsupported protocol scheme"),
            bad_gateway: build_closing_response(502, "Bad Gateway"),
            gateway_timeout: build_closing_response(504, "Gateway Timeout"),
        }
    }

    /// `200 Connection established`.
    pub fn established(&self) -> Bytes {
        self.established.clone()
    }

    /// `400 Unsupported protocol scheme` with `Connection: close`.
    pub fn unsupported_scheme(&self) -> Bytes {
        self.unsupported_scheme.clone()
    }

    /// Sent when the upstream connection could not be opened.
    pub fn bad_gateway(&self) -> Bytes {
        self.bad_gateway.clone()
    }

    /// Sent when the upstream connection attempt timed out.
    pub fn gateway_timeout(&self) -> Bytes {
        self.gateway_timeout.clone()
    }
}

impl Default for ResponseTemplates {
    fn default() -> Self {
        Self::new(&[])
    }
}

/// Standard reason phrase for the status codes interceptors commonly use.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        407 => "Proxy Authentication Required",
        418 => "I'm a teapot",
        429 => "Too Many Requests",
        451 => "Unavailable For Legal Reasons",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}
