//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Per connection:
//!     → timeouts.rs (handshake bound, upstream connect bound, idle bound)
//!     → on expiry: connection closed, both legs torn down
//! ```
//!
//! # Design Decisions
//! - Every wait on the network has a deadline except an established tunnel
//!   with idle timeout disabled
//! - Nothing is retried; a failed tunnel is not resumable

pub mod timeouts;
