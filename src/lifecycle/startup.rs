//! Startup orchestration.
//!
//! # Responsibilities
//! - Load configuration and overlay command-line flags
//! - Initialize logging and metrics
//! - Load TLS material, bind the listener, serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listener binds last (traffic only when ready)

use std::net::SocketAddr;
use std::path::Path;

use crate::cli::Cli;
use crate::config::{check_config, load_config, ConfigError, ProxyConfig};
use crate::http::{HttpServer, ServerError};
use crate::lifecycle::Shutdown;
use crate::net::{bind, load_tls_config, ListenerError, TlsError};
use crate::observability::{logging, metrics};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("TLS: {0}")]
    Tls(#[from] TlsError),
    #[error("{0}")]
    Listener(#[from] ListenerError),
    #[error("{0}")]
    Server(#[from] ServerError),
    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Assemble the effective configuration from an optional file and flags.
pub fn resolve_config(cli: &Cli) -> Result<ProxyConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    cli.apply(&mut config);
    check_config(&config)?;
    Ok(config)
}

/// Run the proxy until SIGINT or SIGTERM.
pub async fn run(cli: Cli) -> Result<(), StartupError> {
    let config = resolve_config(&cli)?;
    logging::init(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        backend = %config.backend.url,
        tls = config.listener.tls.enabled,
        behind_tcp_proxy = config.listener.behind_tcp_proxy,
        "tiny-tls-proxy starting"
    );

    if let Some(addr) = config
        .observability
        .metrics_address
        .as_deref()
        .and_then(|addr| addr.parse::<SocketAddr>().ok())
    {
        metrics::init_metrics(addr)?;
    }

    let mut server = HttpServer::new(&config)?;
    if config.listener.tls.enabled {
        let tls = load_tls_config(
            Path::new(&config.listener.tls.cert_path),
            Path::new(&config.listener.tls.key_path),
        )
        .await?;
        server = server.with_tls(tls);
    }

    let listener = bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    shutdown.trigger_on_signal();

    server.run(listener, signal).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
