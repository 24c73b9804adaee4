//! Command-line interface.
//!
//! Every flag is optional and overrides the matching configuration field, so
//! the proxy runs with flags alone, a config file alone, or both.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::config::{ProxyConfig, ProxyHeaderPolicy};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("invalid duration {0:?} (examples: 0, 250ms, 1.5s, 2m, 1h)")]
    Duration(String),
}

#[derive(Debug, Parser)]
#[command(name = "tiny-tls-proxy", version, about = "TLS-terminating reverse proxy")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Bind address to listen on
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Path to PEM certificate
    #[arg(long, value_name = "PATH")]
    pub cert: Option<String>,

    /// Path to PEM key
    #[arg(long, value_name = "PATH")]
    pub key: Option<String>,

    /// Place to forward connections to
    #[arg(long = "where", value_name = "URL")]
    pub backend: Option<String>,

    /// Accept HTTPS connections
    #[arg(long, value_name = "BOOL", action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub tls: Option<bool>,

    /// Log requests
    #[arg(long, value_name = "BOOL", action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub logging: Option<bool>,

    /// Running behind a TCP proxy (such as ELB or HAProxy)
    #[arg(long, value_name = "BOOL", action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub behind_tcp_proxy: Option<bool>,

    /// Connections without a PROXY header: optional or required
    #[arg(long, value_name = "POLICY")]
    pub proxy_header: Option<ProxyHeaderPolicy>,

    /// Minimum duration between flushes to the client (0 = off)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub flush_interval: Option<Duration>,

    /// Serve Prometheus metrics on this address
    #[arg(long, value_name = "ADDR")]
    pub metrics_listen: Option<String>,
}

impl Cli {
    /// Overlay the flags that were given onto `config`.
    pub fn apply(&self, config: &mut ProxyConfig) {
        if let Some(listen) = &self.listen {
            config.listener.bind_address = listen.clone();
        }
        if let Some(cert) = &self.cert {
            config.listener.tls.cert_path = cert.clone();
        }
        if let Some(key) = &self.key {
            config.listener.tls.key_path = key.clone();
        }
        if let Some(backend) = &self.backend {
            config.backend.url = backend.clone();
        }
        if let Some(tls) = self.tls {
            config.listener.tls.enabled = tls;
        }
        if let Some(logging) = self.logging {
            config.observability.access_log = logging;
        }
        if let Some(behind) = self.behind_tcp_proxy {
            config.listener.behind_tcp_proxy = behind;
        }
        if let Some(policy) = self.proxy_header {
            config.listener.proxy_header = policy;
        }
        if let Some(interval) = self.flush_interval {
            // Round sub-millisecond intervals up rather than disabling them.
            config.backend.flush_interval_ms = interval.as_micros().div_ceil(1000) as u64;
        }
        if let Some(addr) = &self.metrics_listen {
            config.observability.metrics_address = Some(addr.clone());
        }
    }
}

/// Parse a duration written like `250ms`, `1.5s` or `1h30m`.
pub fn parse_duration(input: &str) -> Result<Duration, CliError> {
    let err = || CliError::Duration(input.to_string());
    let s = input.trim();

    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(err());
    }

    let mut rest = s;
    let mut nanos = 0f64;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(err)?;
        if number_end == 0 {
            return Err(err());
        }
        let value: f64 = rest[..number_end].parse().map_err(|_| err())?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(err()),
        };
        nanos += value * scale;
        rest = &rest[unit_end..];
    }

    Ok(Duration::from_nanos(nanos.round() as u64))
}
