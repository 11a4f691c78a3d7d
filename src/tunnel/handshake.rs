//! Per-connection CONNECT state machine.
//!
//! This type performs no I/O. The driver in `relay.rs` feeds it bytes and
//! close events from both legs, performs the upstream dial it asks for, and
//! writes out whatever it queues.
//!
//! ```text
//!                  complete CONNECT + upstream open
//! AwaitingRequest ─────────────────────────────────→ Established
//!        │                                                │
//!        │ non-CONNECT, malformed, rejected,              │ either leg closed,
//!        │ upstream failure                               │ I/O error, shutdown
//!        ▼                                                ▼
//!      Closed ◀──────────────────────────────────────────-┘
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Result, TunnelError};
use crate::http::{ConnectRequest, ParseStatus, PendingRequest, Target};
use crate::net::connection::ConnectionId;
use crate::tunnel::context::TunnelContext;

/// Parse state of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    AwaitingRequest,
    Established,
    Closed,
}

/// One side of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Client,
    Upstream,
}

impl Leg {
    pub fn as_str(&self) -> &'static str {
        match self {
            Leg::Client => "client",
            Leg::Upstream => "upstream",
        }
    }
}

/// What the driver must do after feeding client bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The head is incomplete; read more.
    NeedMore,
    /// Open the upstream leg to this target, then report back with
    /// [`ClientConnection::upstream_established`] or
    /// [`ClientConnection::upstream_failed`].
    Connect(Target),
    /// Bytes were queued for the upstream leg.
    Relay,
}

/// Status of the upstream leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamStatus {
    Connecting,
    Open,
    Closed,
}

/// The upstream half of a tunnel, owned by its [`ClientConnection`].
#[derive(Debug)]
pub struct UpstreamConnection {
    target: Target,
    status: UpstreamStatus,
    outbound: VecDeque<Bytes>,
}

impl UpstreamConnection {
    fn connecting(target: Target) -> Self {
        Self {
            target,
            status: UpstreamStatus::Connecting,
            outbound: VecDeque::new(),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn status(&self) -> UpstreamStatus {
        self.status
    }

    fn queue(&mut self, data: Bytes) {
        if !data.is_empty() {
            self.outbound.push_back(data);
        }
    }
}

/// Handshake and relay state for one accepted client socket.
#[derive(Debug)]
pub struct ClientConnection {
    id: ConnectionId,
    state: TunnelState,
    context: Arc<TunnelContext>,
    pending: Option<PendingRequest>,
    upstream: Option<UpstreamConnection>,
    outbound: VecDeque<Bytes>,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, context: Arc<TunnelContext>) -> Self {
        let pending = PendingRequest::new(context.max_head_bytes);
        Self {
            id,
            state: TunnelState::AwaitingRequest,
            context,
            pending: Some(pending),
            upstream: None,
            outbound: VecDeque::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == TunnelState::Closed
    }

    pub fn upstream(&self) -> Option<&UpstreamConnection> {
        self.upstream.as_ref()
    }

    /// Feed bytes received from the client.
    ///
    /// An `Err` means the connection must be closed once anything already
    /// queued for the client has been written.
    pub fn on_client_data(&mut self, data: Bytes) -> Result<Signal> {
        match self.state {
            TunnelState::Closed => Ok(Signal::NeedMore),
            TunnelState::Established => {
                if let Some(upstream) = self.upstream.as_mut() {
                    upstream.queue(data);
                }
                Ok(Signal::Relay)
            }
            TunnelState::AwaitingRequest => {
                // Data that shows up while the dial is in flight goes after
                // whatever followed the CONNECT head.
                if let Some(upstream) = self.upstream.as_mut() {
                    upstream.queue(data);
                    return Ok(Signal::NeedMore);
                }
                self.parse(data)
            }
        }
    }

    fn parse(&mut self, data: Bytes) -> Result<Signal> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(Signal::NeedMore);
        };

        let (head, remainder) = match pending.feed(&data) {
            Ok(ParseStatus::Partial) => return Ok(Signal::NeedMore),
            Ok(ParseStatus::Complete { head, remainder }) => (head, remainder),
            Err(e) => return Err(self.fail(e)),
        };
        self.pending = None;

        if !head.is_connect() {
            self.outbound.push_back(self.context.templates.unsupported_scheme());
            return Err(self.fail(TunnelError::UnsupportedMethod(head.method)));
        }
        if head.declares_body() {
            return Err(self.fail(TunnelError::MalformedRequest(
                "CONNECT request must not carry a body".into(),
            )));
        }
        let target = match Target::parse(&head.target) {
            Ok(target) => target,
            Err(e) => return Err(self.fail(e)),
        };

        let request = match self.context.interceptors.apply(ConnectRequest { head, target }) {
            Ok(request) => request,
            Err(rejection) => {
                self.outbound.push_back(rejection.to_response());
                return Err(self.fail(TunnelError::Rejected {
                    status: rejection.status,
                    reason: rejection.reason,
                }));
            }
        };

        let mut upstream = UpstreamConnection::connecting(request.target.clone());
        upstream.queue(remainder);
        self.upstream = Some(upstream);

        tracing::debug!(connection_id = %self.id, target = %request.target, "CONNECT accepted");
        Ok(Signal::Connect(request.target))
    }

    /// The upstream dial succeeded: queue the established reply and switch
    /// to relay mode.
    pub fn upstream_established(&mut self) {
        let Some(upstream) = self.upstream.as_mut() else {
            return;
        };
        if self.state != TunnelState::AwaitingRequest || upstream.status != UpstreamStatus::Connecting {
            return;
        }
        upstream.status = UpstreamStatus::Open;
        self.outbound.push_back(self.context.templates.established());
        self.state = TunnelState::Established;
    }

    /// The upstream dial failed: queue the matching error reply and close.
    pub fn upstream_failed(&mut self, error: &TunnelError) {
        if self.state != TunnelState::AwaitingRequest || self.upstream.is_none() {
            return;
        }
        let reply = match error {
            TunnelError::UpstreamTimeout { .. } => self.context.templates.gateway_timeout(),
            _ => self.context.templates.bad_gateway(),
        };
        self.outbound.push_back(reply);
        self.teardown();
    }

    /// Feed bytes received from the upstream leg. Returns whether they were
    /// queued for the client.
    pub fn on_upstream_data(&mut self, data: Bytes) -> bool {
        if self.state != TunnelState::Established {
            return false;
        }
        if !data.is_empty() {
            self.outbound.push_back(data);
        }
        true
    }

    /// Either leg closed or failed. The paired leg is closed with it.
    pub fn on_close(&mut self, leg: Leg) {
        if self.state == TunnelState::Closed {
            return;
        }
        tracing::trace!(connection_id = %self.id, leg = leg.as_str(), "Leg closed, tearing down tunnel");
        self.teardown();
    }

    /// Bytes waiting to be written to the client, in order.
    pub fn take_client_outbound(&mut self) -> Vec<Bytes> {
        self.outbound.drain(..).collect()
    }

    /// Bytes waiting to be written to the upstream leg, in order.
    pub fn take_upstream_outbound(&mut self) -> Vec<Bytes> {
        match self.upstream.as_mut() {
            Some(upstream) if upstream.status != UpstreamStatus::Closed => {
                upstream.outbound.drain(..).collect()
            }
            _ => Vec::new(),
        }
    }

    fn fail(&mut self, error: TunnelError) -> TunnelError {
        self.teardown();
        error
    }

    /// Single teardown routine for both legs. Bytes already queued for the
    /// client are kept so a final reply can still be flushed.
    fn teardown(&mut self) {
        self.state = TunnelState::Closed;
        self.pending = None;
        if let Some(upstream) = self.upstream.as_mut() {
            upstream.status = UpstreamStatus::Closed;
            upstream.outbound.clear();
        }
    }
}
