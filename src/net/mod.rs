//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, ProxyAwareAcceptor)
//!     → proxy_protocol.rs (PROXY v1 header, only when behind a balancer)
//!     → rewind.rs (replay bytes read past the header)
//!     → tls.rs (optional TLS handshake, stacked by axum-server)
//!     → connection.rs (ConnectionInfo attached to each request)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - PROXY decoding sits strictly below TLS
//! - A connection that fails decoding under the required policy is closed
//!   without a response
//! - TLS is optional and handled transparently

pub mod connection;
pub mod listener;
pub mod proxy_protocol;
pub mod rewind;
pub mod tls;

pub use connection::{ConnectionId, ConnectionInfo};
pub use listener::{bind, ListenerError, ListenerMode, ProxyAwareAcceptor};
pub use tls::{load_tls_config, TlsError};
