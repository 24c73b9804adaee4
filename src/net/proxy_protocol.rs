//! HAProxy PROXY protocol v1 decoder.
//!
//! A TCP load balancer prepends one text line to the forwarded connection:
//!
//! ```text
//! PROXY TCP4 192.168.0.1 192.168.0.11 56324 443\r\n
//! ```
//!
//! The decoder runs strictly below TLS. It reads at most
//! [`V1_MAX_LENGTH`] bytes, consumes exactly the header line when one
//! validates, and hands every other byte back through [`Rewind`].
//!
//! Reference: <https://www.haproxy.org/download/1.8/doc/proxy-protocol.txt>

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::ProxyHeaderPolicy;
use crate::net::rewind::Rewind;

/// Every v1 header starts with these bytes.
pub const V1_PREFIX: &[u8] = b"PROXY ";

/// Longest legal v1 header, CRLF included.
pub const V1_MAX_LENGTH: usize = 107;

/// Protocol family declared by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Tcp4,
    Tcp6,
    /// The balancer could not tell; addresses are ignored.
    Unknown,
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Tcp4 => f.write_str("TCP4"),
            AddressFamily::Tcp6 => f.write_str("TCP6"),
            AddressFamily::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// A validated PROXY v1 header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyHeader {
    pub family: AddressFamily,
    /// Original client address. `None` for `UNKNOWN`.
    pub source: Option<SocketAddr>,
    /// Address the client connected to on the balancer.
    pub destination: Option<SocketAddr>,
}

/// Result of looking at the bytes buffered so far.
#[derive(Debug, PartialEq, Eq)]
pub enum Parsed {
    /// A complete header; `consumed` is the line length including CRLF.
    Header { header: ProxyHeader, consumed: usize },
    /// The bytes cannot be the start of a v1 header.
    NotProxy,
    /// Could still become a header; read more.
    Incomplete,
}

/// Why a line that started like a header was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("PROXY header exceeds {V1_MAX_LENGTH} bytes")]
    TooLong,
    #[error("PROXY header is not terminated by CRLF")]
    BadTerminator,
    #[error("PROXY header is not valid UTF-8")]
    NotUtf8,
    #[error("PROXY header has {0} fields, expected 6")]
    FieldCount(usize),
    #[error("unsupported PROXY protocol family {0:?}")]
    UnsupportedFamily(String),
    #[error("invalid {field} address {value:?}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("invalid {field} port {value:?}")]
    InvalidPort { field: &'static str, value: String },
    #[error("{field} address does not belong to family {family}")]
    FamilyMismatch { field: &'static str, family: AddressFamily },
}

/// Why a connection was refused by the decoder.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("connection did not start with a PROXY header")]
    Missing,
    #[error("malformed PROXY header: {0}")]
    Malformed(#[from] HeaderError),
    #[error("timed out waiting for PROXY header")]
    Timeout,
    #[error("failed to read PROXY header: {0}")]
    Io(#[from] io::Error),
}

/// A connection after header processing.
#[derive(Debug)]
pub struct Decoded<S> {
    /// The connection, positioned right after the header (or untouched).
    pub stream: Rewind<S>,
    /// Address downstream layers should treat as the client.
    pub client_addr: SocketAddr,
    pub header: Option<ProxyHeader>,
}

/// Parse a v1 header from the start of `buf`.
pub fn parse_v1(buf: &[u8]) -> Result<Parsed, HeaderError> {
    let prefix_len = buf.len().min(V1_PREFIX.len());
    if buf[..prefix_len] != V1_PREFIX[..prefix_len] {
        return Ok(Parsed::NotProxy);
    }
    if buf.len() < V1_PREFIX.len() {
        return Ok(Parsed::Incomplete);
    }

    let Some(lf) = buf.iter().position(|&b| b == b'\n') else {
        return if buf.len() >= V1_MAX_LENGTH {
            Err(HeaderError::TooLong)
        } else {
            Ok(Parsed::Incomplete)
        };
    };

    let consumed = lf + 1;
    if consumed > V1_MAX_LENGTH {
        return Err(HeaderError::TooLong);
    }
    if buf[lf - 1] != b'\r' {
        return Err(HeaderError::BadTerminator);
    }

    let line = &buf[..lf - 1];
    if line.contains(&b'\r') {
        return Err(HeaderError::BadTerminator);
    }
    let line = std::str::from_utf8(line).map_err(|_| HeaderError::NotUtf8)?;
    let header = parse_line(line)?;

    Ok(Parsed::Header { header, consumed })
}

fn parse_line(line: &str) -> Result<ProxyHeader, HeaderError> {
    let fields: Vec<&str> = line.split(' ').collect();

    let family = match fields.get(1) {
        Some(&"TCP4") => AddressFamily::Tcp4,
        Some(&"TCP6") => AddressFamily::Tcp6,
        Some(&"UNKNOWN") => {
            return Ok(ProxyHeader {
                family: AddressFamily::Unknown,
                source: None,
                destination: None,
            })
        }
        Some(other) => return Err(HeaderError::UnsupportedFamily((*other).to_string())),
        None => return Err(HeaderError::FieldCount(fields.len())),
    };

    if fields.len() != 6 {
        return Err(HeaderError::FieldCount(fields.len()));
    }

    let src_ip = parse_ip("source", fields[2], family)?;
    let dst_ip = parse_ip("destination", fields[3], family)?;
    let src_port = parse_port("source", fields[4])?;
    let dst_port = parse_port("destination", fields[5])?;

    Ok(ProxyHeader {
        family,
        source: Some(SocketAddr::new(src_ip, src_port)),
        destination: Some(SocketAddr::new(dst_ip, dst_port)),
    })
}

fn parse_ip(field: &'static str, value: &str, family: AddressFamily) -> Result<IpAddr, HeaderError> {
    let ip: IpAddr = value.parse().map_err(|_| HeaderError::InvalidAddress {
        field,
        value: value.to_string(),
    })?;

    let matches = match family {
        AddressFamily::Tcp4 => ip.is_ipv4(),
        AddressFamily::Tcp6 => ip.is_ipv6(),
        AddressFamily::Unknown => true,
    };
    if !matches {
        return Err(HeaderError::FamilyMismatch { field, family });
    }
    Ok(ip)
}

fn parse_port(field: &'static str, value: &str) -> Result<u16, HeaderError> {
    let invalid = || HeaderError::InvalidPort {
        field,
        value: value.to_string(),
    };
    // u16::from_str would also take a leading '+'.
    if value.is_empty() || value.len() > 5 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    value.parse().map_err(|_| invalid())
}

/// Read and validate a PROXY header from a freshly accepted connection.
///
/// Under [`ProxyHeaderPolicy::Optional`] a missing or malformed header falls
/// back to `peer_addr` and every byte read is replayed. Under
/// [`ProxyHeaderPolicy::Required`] it is an error and the caller closes the
/// connection.
pub async fn read_proxy_header<S>(
    mut stream: S,
    peer_addr: SocketAddr,
    policy: ProxyHeaderPolicy,
    timeout: Duration,
) -> Result<Decoded<S>, DecodeError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; V1_MAX_LENGTH];
    let mut filled = 0;

    let outcome = tokio::time::timeout(timeout, async {
        loop {
            let n = stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                // EOF before we could decide.
                return Ok::<_, io::Error>(Ok(Parsed::NotProxy));
            }
            filled += n;

            match parse_v1(&buf[..filled]) {
                Ok(Parsed::Incomplete) if filled < buf.len() => continue,
                Ok(Parsed::Incomplete) => return Ok(Err(HeaderError::TooLong)),
                other => return Ok(other),
            }
        }
    })
    .await
    .map_err(|_| DecodeError::Timeout)??;

    let read = Bytes::copy_from_slice(&buf[..filled]);

    let fallback = match outcome {
        Ok(Parsed::Header { header, consumed }) => {
            let client_addr = header.source.unwrap_or(peer_addr);
            tracing::debug!(
                peer_addr = %peer_addr,
                client_addr = %client_addr,
                family = %header.family,
                consumed,
                "PROXY header decoded"
            );
            return Ok(Decoded {
                stream: Rewind::with_prefix(stream, read.slice(consumed..)),
                client_addr,
                header: Some(header),
            });
        }
        Ok(Parsed::NotProxy) | Ok(Parsed::Incomplete) => DecodeError::Missing,
        Err(e) => DecodeError::Malformed(e),
    };

    match policy {
        ProxyHeaderPolicy::Required => Err(fallback),
        ProxyHeaderPolicy::Optional => {
            tracing::debug!(
                peer_addr = %peer_addr,
                reason = %fallback,
                "No usable PROXY header, treating connection as direct"
            );
            Ok(Decoded {
                stream: Rewind::with_prefix(stream, read),
                client_addr: peer_addr,
                header: None,
            })
        }
    }
}
