//! Incremental request-head parsing.
//!
//! Bytes are accumulated until `httparse` reports a complete head (request
//! line, headers, and the terminating blank line). Nothing is consumed past
//! the head; any extra bytes are handed back untouched.

use bytes::{Bytes, BytesMut};

use crate::error::{Result, TunnelError};
use crate::http::request::{Headers, RequestHead};

/// Maximum number of headers accepted in a request head.
pub const MAX_HEADERS: usize = 64;

/// Outcome of feeding a chunk into a [`PendingRequest`].
#[derive(Debug, PartialEq, Eq)]
pub enum ParseStatus {
    /// More bytes are required before the head is complete.
    Partial,
    /// The head is complete. `remainder` holds any bytes that followed it.
    Complete { head: RequestHead, remainder: Bytes },
}

/// Accumulator for a request head arriving in arbitrary chunks.
#[derive(Debug)]
pub struct PendingRequest {
    buffer: BytesMut,
    max_head_bytes: usize,
}

impl PendingRequest {
    pub fn new(max_head_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_head_bytes,
        }
    }

    /// Number of bytes buffered so far.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append `chunk` and try to complete the head.
    ///
    /// Errors are terminal: the caller must drop the connection.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<ParseStatus> {
        self.buffer.extend_from_slice(chunk);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        match req.parse(&self.buffer) {
            Ok(httparse::Status::Complete(len)) => {
                if len > self.max_head_bytes {
                    return Err(self.too_large());
                }
                let head = RequestHead {
                    method: req.method.unwrap_or_default().to_string(),
                    target: req.path.unwrap_or_default().to_string(),
                    version: req.version.unwrap_or(1),
                    headers: collect_headers(req.headers),
                };
                let remainder = self.buffer.split_off(len).freeze();
                self.buffer.clear();
                Ok(ParseStatus::Complete { head, remainder })
            }
            Ok(httparse::Status::Partial) => {
                if self.buffer.len() > self.max_head_bytes {
                    return Err(self.too_large());
                }
                Ok(ParseStatus::Partial)
            }
            Err(e) => Err(TunnelError::MalformedRequest(e.to_string())),
        }
    }

    fn too_large(&self) -> TunnelError {
        TunnelError::MalformedRequest(format!(
            "request head exceeds {} bytes",
            self.max_head_bytes
        ))
    }
}

fn collect_headers(raw: &[httparse::Header<'_>]) -> Headers {
    let mut headers = Headers::new();
    for h in raw.iter().take_while(|h| !h.name.is_empty()) {
        headers.append(h.name, String::from_utf8_lossy(h.value).into_owned());
    }
    headers
}
