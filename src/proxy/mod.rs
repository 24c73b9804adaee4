//! Reverse proxy subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP request (from http::server)
//!     → forward.rs (resolve target, prepare, send, relay)
//!     → target.rs (default backend, `_url` override, URI mapping)
//!     → headers.rs (hop-by-hop, X-Forwarded-For)
//!     → transport.rs (hyper client, 503 on network failure)
//!     → rewrite.rs (body rules, Content-Length, CSP/CORS headers)
//!     → flush.rs (flush interval)
//!     → HTTP response
//! ```

pub mod flush;
pub mod forward;
pub mod headers;
pub mod rewrite;
pub mod target;
pub mod transport;

pub use forward::{proxy_handler, routes, ProxyState};
pub use rewrite::{ReplaceLiteral, RewritePipeline, RewriteRule};
pub use target::{BackendTarget, DefaultTarget, TargetError};
pub use transport::{ConnectionErrorHandler, HyperTransport, Transport, TransportError};
