//! Configuration validation.
//!
//! Serde handles syntax; this module checks values that parse but cannot
//! work. All problems are reported together so a bad deployment can be fixed
//! in one pass.

use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;
use crate::proxy::target::{BackendTarget, TargetError};

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener bind address is empty")]
    EmptyBindAddress,
    #[error("backend url {url:?}: {reason}")]
    InvalidBackend { url: String, reason: TargetError },
    #[error("TLS is enabled but {0} is empty")]
    MissingTlsPath(&'static str),
    #[error("PROXY header timeout must be greater than zero")]
    ZeroHeaderTimeout,
    #[error("metrics address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Validate a configuration, returning every error found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.trim().is_empty() {
        errors.push(ValidationError::EmptyBindAddress);
    }

    if let Err(reason) = BackendTarget::parse(&config.backend.url) {
        errors.push(ValidationError::InvalidBackend {
            url: config.backend.url.clone(),
            reason,
        });
    }

    let tls = &config.listener.tls;
    if tls.enabled {
        if tls.cert_path.trim().is_empty() {
            errors.push(ValidationError::MissingTlsPath("cert_path"));
        }
        if tls.key_path.trim().is_empty() {
            errors.push(ValidationError::MissingTlsPath("key_path"));
        }
    }

    if config.listener.behind_tcp_proxy && config.listener.proxy_header_timeout_ms == 0 {
        errors.push(ValidationError::ZeroHeaderTimeout);
    }

    if let Some(addr) = &config.observability.metrics_address {
        if addr.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidMetricsAddress(addr.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
