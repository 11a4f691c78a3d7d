//! Opening the upstream leg of a tunnel.

use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::{Result, TunnelError};
use crate::http::Target;

/// Opens a byte stream to a CONNECT target.
///
/// Timeouts are applied by the caller; implementations only dial.
pub trait Upstream: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn open(&self, target: &Target) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// Dials targets over TCP, resolving host names with the system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Upstream for TcpConnector {
    type Stream = TcpStream;

    async fn open(&self, target: &Target) -> Result<TcpStream> {
        let stream = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|e| TunnelError::UpstreamConnect {
                target: target.to_string(),
                reason: e.to_string(),
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(target = %target, error = %e, "Failed to set TCP_NODELAY");
        }
        Ok(stream)
    }
}
