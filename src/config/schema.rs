//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files, and
//! every field has a default so a partial file (or no file) is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS, PROXY protocol).
    pub listener: ListenerConfig,

    /// Backend the proxy forwards to.
    pub backend: BackendConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "localhost:443"). Host names are resolved.
    pub bind_address: String,

    /// TLS termination settings.
    pub tls: TlsConfig,

    /// Set when a TCP load balancer in front of us prepends PROXY headers.
    pub behind_tcp_proxy: bool,

    /// What to do with connections that lack a valid PROXY header.
    pub proxy_header: ProxyHeaderPolicy,

    /// How long to wait for the PROXY header, in milliseconds.
    pub proxy_header_timeout_ms: u64,
}

impl ListenerConfig {
    pub fn proxy_header_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_header_timeout_ms)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "localhost:443".to_string(),
            tls: TlsConfig::default(),
            behind_tcp_proxy: false,
            proxy_header: ProxyHeaderPolicy::default(),
            proxy_header_timeout_ms: 5_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Accept HTTPS connections.
    pub enabled: bool,

    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cert_path: "/etc/ssl/private/cert.pem".to_string(),
            key_path: "/etc/ssl/private/key.pem".to_string(),
        }
    }
}

/// Handling of connections without a usable PROXY header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyHeaderPolicy {
    /// Treat the connection as a direct client and use the socket peer address.
    #[default]
    Optional,
    /// Close the connection.
    Required,
}

impl std::str::FromStr for ProxyHeaderPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "optional" => Ok(ProxyHeaderPolicy::Optional),
            "required" => Ok(ProxyHeaderPolicy::Required),
            other => Err(format!("unknown PROXY header policy {other:?} (expected optional or required)")),
        }
    }
}

/// Backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Default backend URL; may be replaced at runtime by the `_url` override.
    pub url: String,

    /// Backend connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Minimum time between flushes to the client in milliseconds (0 = off).
    pub flush_interval_ms: u64,
}

impl BackendConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "https://www.imageengine.io/".to_string(),
            connect_timeout_secs: 30,
            flush_interval_ms: 0,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log every request.
    pub access_log: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Prometheus exporter bind address; unset disables the exporter.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            access_log: true,
            log_level: "info".to_string(),
            json_logs: false,
            metrics_address: None,
        }
    }
}
