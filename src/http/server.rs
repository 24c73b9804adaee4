//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the forwarding handler
//! - Wire up middleware (request ID, access log)
//! - Stack the connection layers: PROXY acceptor, optional TLS, hyper
//! - Serve HTTP/1.1 and HTTP/2 until shutdown, then drain

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use axum_server::Handle;
use tokio::sync::broadcast;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::config::ProxyConfig;
use crate::net::listener::{ListenerMode, ProxyAwareAcceptor};
use crate::observability::access_log;
use crate::proxy::forward::{routes, ProxyState};
use crate::proxy::target::{BackendTarget, DefaultTarget, TargetError};
use crate::proxy::transport::{ConnectionErrorHandler, HyperTransport, Transport};

/// How long in-flight requests may run after shutdown is signalled.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid backend: {0}")]
    Backend(#[from] TargetError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    router: Router,
    mode: ListenerMode,
    tls: Option<RustlsConfig>,
    targets: Arc<DefaultTarget>,
}

impl HttpServer {
    /// Create a server forwarding through the default hyper transport.
    pub fn new(config: &ProxyConfig) -> Result<Self, ServerError> {
        let transport = ConnectionErrorHandler::new(HyperTransport::new(
            config.backend.connect_timeout(),
        ));
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a server forwarding through `transport`.
    pub fn with_transport(
        config: &ProxyConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ServerError> {
        let initial = BackendTarget::parse(&config.backend.url)?;
        let targets = Arc::new(DefaultTarget::new(initial));

        let state = ProxyState::new(Arc::clone(&targets), transport)
            .with_flush_interval(config.backend.flush_interval());

        Ok(Self {
            router: Self::build_router(config, state),
            mode: ListenerMode::from_config(&config.listener),
            tls: None,
            targets,
        })
    }

    /// Terminate TLS with the given certificate configuration.
    pub fn with_tls(mut self, tls: RustlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// The shared default backend.
    pub fn targets(&self) -> Arc<DefaultTarget> {
        Arc::clone(&self.targets)
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: ProxyState) -> Router {
        let router = routes(state);
        let router = if config.observability.access_log {
            router.layer(access_log::layer())
        } else {
            router
        };

        router
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: std::net::TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            tls = self.tls.is_some(),
            behind_tcp_proxy = matches!(self.mode, ListenerMode::Decode { .. }),
            backend = %self.targets.load(),
            "HTTP server starting"
        );

        let handle = Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!(
                connections = drain.connection_count(),
                "Shutdown signal received, draining connections"
            );
            drain.graceful_shutdown(Some(DRAIN_TIMEOUT));
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let acceptor = ProxyAwareAcceptor::new(self.mode);
        let server = axum_server::from_tcp(listener).handle(handle);

        match self.tls {
            Some(tls) => {
                server
                    .acceptor(RustlsAcceptor::new(tls).acceptor(acceptor))
                    .serve(app)
                    .await?
            }
            None => server.acceptor(acceptor).serve(app).await?,
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_backend_is_rejected() {
        let mut config = ProxyConfig::default();
        config.backend.url = "mailto:someone@example.com".into();
        assert!(matches!(
            HttpServer::new(&config),
            Err(ServerError::Backend(TargetError::UnsupportedScheme(_)))
        ));
    }

    #[tokio::test]
    async fn test_server_stops_on_shutdown() {
        let mut config = ProxyConfig::default();
        config.listener.tls.enabled = false;
        config.backend.url = "http://127.0.0.1:9/".into();

        let server = HttpServer::new(&config).unwrap();
        assert_eq!(server.targets().load().as_str(), "http://127.0.0.1:9/");

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(server.run(listener, rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_server_stops_when_shutdown_dropped() {
        let mut config = ProxyConfig::default();
        config.listener.tls.enabled = false;
        config.backend.url = "http://127.0.0.1:9/".into();

        let server = HttpServer::new(&config).unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let (tx, rx) = broadcast::channel::<()>(1);
        let task = tokio::spawn(server.run(listener, rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(tx);

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
