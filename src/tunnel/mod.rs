//! CONNECT tunnel subsystem.
//!
//! # Data Flow
//! ```text
//! server.rs (accept, spawn per connection)
//!     → relay.rs (drive one connection)
//!         → handshake.rs (state machine: parse, gate, queue replies)
//!         → upstream.rs (dial target)
//!         → relay.rs (pump bytes both ways until either leg closes)
//! ```
//!
//! # Design Decisions
//! - The state machine does no I/O, so every transition is unit-testable
//! - One task per connection; both legs are served by one `select!` loop
//! - Closing either leg closes the other; half-open tunnels are not kept

pub mod context;
pub mod handshake;
pub mod relay;
pub mod server;
pub mod upstream;

pub use context::TunnelContext;
pub use handshake::{ClientConnection, Leg, Signal, TunnelState, UpstreamConnection, UpstreamStatus};
pub use relay::{serve_connection, CloseReason, TunnelSummary};
pub use server::TunnelServer;
pub use upstream::{TcpConnector, Upstream};
