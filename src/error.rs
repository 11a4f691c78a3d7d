//! Error types for tunnel handling.

use thiserror::Error;

/// Errors that can terminate a single tunnel connection.
///
/// None of these escape past the connection task; the server logs them and
/// closes the affected connection only.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The request head could not be parsed, or violated a CONNECT rule.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// A well-formed request that is not CONNECT.
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    /// An interceptor refused the request.
    #[error("Request rejected ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    /// DNS resolution or TCP connect to the target failed.
    #[error("Upstream connection failed to {target}: {reason}")]
    UpstreamConnect { target: String, reason: String },

    /// The target did not accept the connection within the connect timeout.
    #[error("Upstream connection to {target} timed out after {secs}s")]
    UpstreamTimeout { target: String, secs: u64 },

    /// The client did not finish the handshake within the configured bound.
    #[error("Handshake timed out after {0}s")]
    HandshakeTimeout(u64),

    /// The client closed the connection before completing the handshake.
    #[error("Client closed connection during handshake")]
    ClientClosed,

    /// The server began shutting down before the tunnel was established.
    #[error("Server shutting down")]
    Shutdown,

    /// Read or write failure on either leg.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    /// Short label used for the `outcome` metric dimension.
    pub fn outcome(&self) -> &'static str {
        match self {
            TunnelError::MalformedRequest(_) => "malformed",
            TunnelError::UnsupportedMethod(_) => "unsupported_method",
            TunnelError::Rejected { .. } => "rejected",
            TunnelError::UpstreamConnect { .. } => "upstream_error",
            TunnelError::UpstreamTimeout { .. } => "upstream_timeout",
            TunnelError::HandshakeTimeout(_) => "handshake_timeout",
            TunnelError::ClientClosed => "client_closed",
            TunnelError::Shutdown => "shutdown",
            TunnelError::Io(_) => "io_error",
        }
    }
}

/// Result type alias for tunnel operations.
pub type Result<T> = std::result::Result<T, TunnelError>;
