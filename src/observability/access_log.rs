//! Per-request access log.
//!
//! One span per request carrying the client address, method, path and
//! request ID, and one event when the response head is ready. Built on
//! tower-http's `TraceLayer`; the server installs it only when
//! `observability.access_log` is set.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, Response};
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultOnBodyChunk, DefaultOnEos, DefaultOnRequest, TraceLayer};
use tracing::Span;

use crate::net::connection::ConnectionInfo;

pub type AccessLogLayer = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    fn(&Request<Body>) -> Span,
    DefaultOnRequest,
    fn(&Response<Body>, Duration, &Span),
    DefaultOnBodyChunk,
    DefaultOnEos,
    (),
>;

pub fn layer() -> AccessLogLayer {
    TraceLayer::new_for_http()
        .make_span_with(make_span as fn(&Request<Body>) -> Span)
        .on_response(on_response as fn(&Response<Body>, Duration, &Span))
        .on_failure(())
}

/// Best known client address for a request.
pub fn client_addr<B>(request: &Request<B>) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectionInfo>()
        .map(|info| info.client_addr)
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr)
        })
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    let client = client_addr(request)
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "-".to_string());
    let connection = request
        .extensions()
        .get::<ConnectionInfo>()
        .map(|info| info.id.to_string())
        .unwrap_or_else(|| "-".to_string());

    tracing::info_span!(
        "request",
        client = %client,
        connection = %connection,
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    )
}

fn on_response(response: &Response<Body>, latency: Duration, _span: &Span) {
    tracing::info!(
        status = response.status().as_u16(),
        latency_ms = latency.as_millis() as u64,
        "Request completed"
    );
}
