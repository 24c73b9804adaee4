//! TCP listener and the PROXY-aware acceptor.
//!
//! # Responsibilities
//! - Bind to the configured address (host names are resolved)
//! - Decode PROXY headers on accepted connections when behind a balancer
//! - Attach [`ConnectionInfo`] to every request served on the connection
//!
//! # Design Decisions
//! - The acceptor is an `axum_server::accept::Accept` layer, so TLS stacks
//!   on top of it and the handshake only ever sees post-header bytes
//! - Header decoding runs in the per-connection task, so a slow client never
//!   stalls the accept loop

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum_server::accept::Accept;
use futures_util::future::BoxFuture;
use tokio::net::TcpStream;
use tower_http::add_extension::AddExtension;

use crate::config::{ListenerConfig, ProxyHeaderPolicy};
use crate::net::connection::ConnectionInfo;
use crate::net::proxy_protocol::read_proxy_header;
use crate::net::rewind::Rewind;
use crate::observability::metrics;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// Bind a TCP listener, resolving host names such as `localhost:443`.
///
/// Returns a non-blocking std listener ready for `axum_server::from_tcp`.
pub async fn bind(address: &str) -> Result<std::net::TcpListener, ListenerError> {
    let err = |source| ListenerError::Bind {
        address: address.to_string(),
        source,
    };

    let listener = tokio::net::TcpListener::bind(address).await.map_err(err)?;
    let local_addr = listener.local_addr().map_err(err)?;

    tracing::info!(address = %local_addr, "Listener bound");

    listener.into_std().map_err(err)
}

/// How accepted connections are treated before TLS/HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerMode {
    /// Not behind a balancer; no bytes are read and the peer is the client.
    Passthrough,
    /// Expect a PROXY v1 header on every connection.
    Decode {
        policy: ProxyHeaderPolicy,
        timeout: Duration,
    },
}

impl ListenerMode {
    pub fn from_config(config: &ListenerConfig) -> Self {
        if config.behind_tcp_proxy {
            ListenerMode::Decode {
                policy: config.proxy_header,
                timeout: config.proxy_header_timeout(),
            }
        } else {
            ListenerMode::Passthrough
        }
    }
}

/// Acceptor that resolves the effective client address of a connection.
#[derive(Debug, Clone, Copy)]
pub struct ProxyAwareAcceptor {
    mode: ListenerMode,
}

impl ProxyAwareAcceptor {
    pub fn new(mode: ListenerMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ListenerMode {
        self.mode
    }
}

impl<S> Accept<TcpStream, S> for ProxyAwareAcceptor
where
    S: Send + 'static,
{
    type Stream = Rewind<TcpStream>;
    type Service = AddExtension<S, ConnectionInfo>;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: TcpStream, service: S) -> Self::Future {
        let mode = self.mode;
        Box::pin(async move {
            let peer_addr = stream.peer_addr()?;
            let (stream, info) = resolve(stream, peer_addr, mode).await?;

            tracing::debug!(
                connection_id = %info.id,
                peer_addr = %info.peer_addr,
                client_addr = %info.client_addr,
                "Connection accepted"
            );

            Ok((stream, AddExtension::new(service, info)))
        })
    }
}

async fn resolve(
    stream: TcpStream,
    peer_addr: SocketAddr,
    mode: ListenerMode,
) -> io::Result<(Rewind<TcpStream>, ConnectionInfo)> {
    let (policy, timeout) = match mode {
        ListenerMode::Passthrough => {
            return Ok((Rewind::new(stream), ConnectionInfo::direct(peer_addr)));
        }
        ListenerMode::Decode { policy, timeout } => (policy, timeout),
    };

    match read_proxy_header(stream, peer_addr, policy, timeout).await {
        Ok(decoded) => {
            metrics::record_proxy_header(if decoded.header.is_some() {
                "decoded"
            } else {
                "absent"
            });
            Ok((
                decoded.stream,
                ConnectionInfo::new(peer_addr, decoded.client_addr),
            ))
        }
        Err(e) => {
            metrics::record_proxy_header("rejected");
            tracing::warn!(
                peer_addr = %peer_addr,
                error = %e,
                "Rejecting connection without valid PROXY header"
            );
            Err(io::Error::new(io::ErrorKind::InvalidData, e))
        }
    }
}
