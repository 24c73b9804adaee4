//! Per-connection identity.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Carry the effective client address from the acceptor to handlers

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Addresses of an accepted connection.
///
/// Inserted into every request's extensions by the acceptor. `client_addr`
/// is the address declared by a PROXY header when one was decoded, otherwise
/// the socket peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    /// Address of the socket peer (the balancer, when behind one).
    pub peer_addr: SocketAddr,
    /// Address of the originating client.
    pub client_addr: SocketAddr,
}

impl ConnectionInfo {
    pub fn new(peer_addr: SocketAddr, client_addr: SocketAddr) -> Self {
        Self {
            id: ConnectionId::new(),
            peer_addr,
            client_addr,
        }
    }

    /// Connection that did not pass through a balancer.
    pub fn direct(peer_addr: SocketAddr) -> Self {
        Self::new(peer_addr, peer_addr)
    }

    /// True when the client address came from a PROXY header.
    pub fn is_proxied(&self) -> bool {
        self.peer_addr != self.client_addr
    }
}
