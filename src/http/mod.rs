//! HTTP handshake handling.
//!
//! # Data Flow
//! ```text
//! Raw client bytes
//!     → parser.rs (incremental head parsing via httparse)
//!     → request.rs (owned head, CONNECT target)
//!     → interceptor.rs (ordered accept/reject chain)
//!     → response.rs (precomputed replies written back to the client)
//! ```
//!
//! Only the request head is ever parsed. After a tunnel is established the
//! connection carries opaque bytes and this module is no longer involved.

pub mod interceptor;
pub mod parser;
pub mod request;
pub mod response;

pub use interceptor::{ConnectRequest, InterceptorChain, Rejection, RequestInterceptor};
pub use parser::{ParseStatus, PendingRequest};
pub use request::{Headers, RequestHead, Target};
pub use response::ResponseTemplates;
