//! HTTP CONNECT tunnel endpoint.
//!
//! Accepts `CONNECT host:port` requests, dials the target, answers
//! `200 Connection established`, then relays bytes opaquely in both
//! directions. Anything other than CONNECT is refused with a 400.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod tunnel;

pub use config::TunnelConfig;
pub use error::TunnelError;
pub use lifecycle::Shutdown;
pub use tunnel::TunnelServer;
