//! Outbound transport to the backend.
//!
//! # Responsibilities
//! - Send a prepared request to the backend over HTTP or HTTPS
//! - Classify failures as network-level or other
//! - Replace network-level failures with a synthetic 503 page
//!
//! # Design Decisions
//! - `Transport` is a small object-safe trait so the failure handler is a
//!   decorator over any other transport (and tests can inject fakes)
//! - Only network-level failures are absorbed; anything else propagates to
//!   the forwarder's generic 502 path

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Response, StatusCode};
use futures_util::future::BoxFuture;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::observability::{access_log, metrics};

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Fixed page served when the backend cannot be reached.
pub const BACKEND_UNAVAILABLE_PAGE: &str = concat!(
    "<!DOCTYPE html><html>\n",
    "<head>\n",
    "<title>\n",
    "Backend Unavailable\n",
    "</title>\n",
    "<style>\n",
    "body {\n",
    "\tfont-family: fantasy;\n",
    "\ttext-align: center;\n",
    "\tpadding-top: 20%;\n",
    "\tbackground-color: #f1f6f8;\n",
    "}\n",
    "</style>\n",
    "</head>\n",
    "<body>\n",
    "<h1>503 Backend Unavailable</h1>\n",
    "<p>Sorry, we&lsquo;re having a brief problem. You can retry.</p>\n",
    "<p>If the problem persists, please get in touch.</p>\n",
    "</body>\n",
    "</html>",
);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection refused or reset, DNS failure, timeout.
    #[error("backend unreachable: {0}")]
    Network(#[source] BoxError),
    #[error("backend request failed: {0}")]
    Other(#[source] BoxError),
}

impl TransportError {
    pub fn is_network(&self) -> bool {
        matches!(self, TransportError::Network(_))
    }
}

/// Sends a request to the backend.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: Request<Body>,
    ) -> BoxFuture<'static, Result<Response<Body>, TransportError>>;
}

/// Pooled hyper client speaking HTTP/1.1 and HTTP/2 over plain TCP or TLS.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl HyperTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        if !connect_timeout.is_zero() {
            http.set_connect_timeout(Some(connect_timeout));
        }

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);

        Self {
            client: Client::builder(TokioExecutor::new()).build(https),
        }
    }
}

impl Transport for HyperTransport {
    fn send(
        &self,
        request: Request<Body>,
    ) -> BoxFuture<'static, Result<Response<Body>, TransportError>> {
        let future = self.client.request(request);
        Box::pin(async move {
            match future.await {
                Ok(response) => Ok(response.map(Body::new)),
                Err(e) if is_network_error(&e) => Err(TransportError::Network(Box::new(e))),
                Err(e) => Err(TransportError::Other(Box::new(e))),
            }
        })
    }
}

fn is_network_error(err: &hyper_util::client::legacy::Error) -> bool {
    let mut source = err.source();
    while let Some(e) = source {
        if e.is::<rustls::Error>() {
            return false;
        }
        if let Some(e) = e.downcast_ref::<io::Error>() {
            if let Some(network) = classify_io(e) {
                return network;
            }
        }
        if let Some(e) = e.downcast_ref::<hyper::Error>() {
            if e.is_incomplete_message() || e.is_timeout() || e.is_closed() {
                return true;
            }
        }
        source = e.source();
    }

    // DNS failures and connect timeouts carry no telling io kind.
    err.is_connect()
}

/// `Some(false)` for TLS failures, `Some(true)` for transport-level io
/// failures, `None` when the kind says nothing either way.
fn classify_io(err: &io::Error) -> Option<bool> {
    if let Some(inner) = err.get_ref() {
        if inner.is::<rustls::Error>() {
            return Some(false);
        }
        if let Some(inner) = inner.downcast_ref::<io::Error>() {
            if let Some(network) = classify_io(inner) {
                return Some(network);
            }
        }
    }

    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::TimedOut
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::AddrNotAvailable => Some(true),
        io::ErrorKind::InvalidData => Some(false),
        _ => None,
    }
}

/// Decorator that turns network failures into [`backend_unavailable`].
pub struct ConnectionErrorHandler<T> {
    inner: T,
}

impl<T> ConnectionErrorHandler<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

impl<T: Transport> Transport for ConnectionErrorHandler<T> {
    fn send(
        &self,
        request: Request<Body>,
    ) -> BoxFuture<'static, Result<Response<Body>, TransportError>> {
        let client = access_log::client_addr(&request)
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "-".to_string());
        let path = request.uri().path().to_string();
        let future = self.inner.send(request);

        Box::pin(async move {
            let err = match future.await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            tracing::error!(
                client = %client,
                path = %path,
                error = %err,
                "Backend request failed"
            );

            if err.is_network() {
                metrics::record_backend_unavailable();
                Ok(backend_unavailable())
            } else {
                Err(err)
            }
        })
    }
}

/// The synthetic 503 response.
pub fn backend_unavailable() -> Response<Body> {
    let mut response = Response::new(Body::from(BACKEND_UNAVAILABLE_PAGE));
    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}
