//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (ProxyAwareAcceptor, optional TLS)
//!     → server.rs (Axum setup, HTTP/1.1 + HTTP/2)
//!     → request ID, access log
//!     → proxy::forward (every path and method)
//!     → Send to client
//! ```

pub mod server;

pub use server::{HttpServer, ServerError};
