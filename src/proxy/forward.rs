//! Reverse proxy forwarder.
//!
//! # Responsibilities
//! - Resolve the backend for each request (default or `_url` override)
//! - Rewrite the request onto the backend and send it through the transport
//! - Relay the response through the rewrite pipeline and flush policy
//! - Tag `/_version` responses with the proxy version
//!
//! # Request Flow
//! ```text
//! inbound request
//!     → DefaultTarget::resolve (may swap the default)
//!     → prepare (URI, Host, hop-by-hop, X-Forwarded-For)
//!     → Transport (ConnectionErrorHandler<HyperTransport>)
//!     → RewritePipeline::apply → flush::coalesce
//!     → version header, metrics
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{Method, Request, Response, StatusCode, Version};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;

use crate::observability::{access_log, metrics};
use crate::proxy::flush;
use crate::proxy::headers::{append_forwarded_for, remove_hop_by_hop};
use crate::proxy::rewrite::RewritePipeline;
use crate::proxy::target::{BackendTarget, DefaultTarget, TargetError};
use crate::proxy::transport::Transport;

/// Requests to this path get [`VERSION_HEADER`] on the response.
pub const VERSION_PATH: &str = "/_version";

pub const VERSION_HEADER: HeaderName = HeaderName::from_static("x-tiny-ssl-version");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared state for the forwarding handler.
#[derive(Clone)]
pub struct ProxyState {
    pub targets: Arc<DefaultTarget>,
    pub transport: Arc<dyn Transport>,
    pub rewrite: Arc<RewritePipeline>,
    pub flush_interval: Duration,
}

impl ProxyState {
    pub fn new(targets: Arc<DefaultTarget>, transport: Arc<dyn Transport>) -> Self {
        Self {
            targets,
            transport,
            rewrite: Arc::new(RewritePipeline::default()),
            flush_interval: Duration::ZERO,
        }
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_rewrite(mut self, pipeline: RewritePipeline) -> Self {
        self.rewrite = Arc::new(pipeline);
        self
    }
}

/// Route every path and method to [`proxy_handler`].
pub fn routes(state: ProxyState) -> Router {
    Router::new()
        .route("/{*path}", any(proxy_handler))
        .route("/", any(proxy_handler))
        .with_state(state)
}

/// Main proxy handler.
pub async fn proxy_handler(State(state): State<ProxyState>, request: Request<Body>) -> Response<Body> {
    let start = Instant::now();
    let method = request.method().clone();
    let tag_version = request.uri().path() == VERSION_PATH;

    let target = state.targets.resolve(request.uri().query());

    let mut response = match prepare(request, &target) {
        Ok(outbound) => match state.transport.send(outbound).await {
            Ok(response) => relay(&state, response, &method).await,
            Err(e) => {
                tracing::debug!(backend = %target, error = %e, "Responding 502");
                metrics::record_backend_error();
                StatusCode::BAD_GATEWAY.into_response()
            }
        },
        Err(e) => {
            tracing::warn!(backend = %target, error = %e, "Cannot address backend");
            metrics::record_backend_error();
            StatusCode::BAD_GATEWAY.into_response()
        }
    };

    if tag_version {
        response
            .headers_mut()
            .append(VERSION_HEADER, HeaderValue::from_static(VERSION));
    }

    metrics::record_request(method.as_str(), response.status().as_u16(), start);
    response
}

/// Turn an inbound request into one addressed to `target`.
///
/// Extensions are carried over so the transport can still see the
/// connection's client address.
pub fn prepare(request: Request<Body>, target: &BackendTarget) -> Result<Request<Body>, TargetError> {
    let client_ip = access_log::client_addr(&request).map(|addr| addr.ip());
    let (mut parts, body) = request.into_parts();

    parts.uri = target.request_uri(&parts.uri)?;
    parts.version = Version::HTTP_11;

    remove_hop_by_hop(&mut parts.headers);
    // The client sets Host from the URI authority.
    parts.headers.remove(header::HOST);
    if let Some(ip) = client_ip {
        append_forwarded_for(&mut parts.headers, ip);
    }

    Ok(Request::from_parts(parts, body))
}

async fn relay(state: &ProxyState, response: Response<Body>, method: &Method) -> Response<Body> {
    let (mut parts, body) = response.into_parts();
    remove_hop_by_hop(&mut parts.headers);

    let response = state
        .rewrite
        .apply(Response::from_parts(parts, body), method)
        .await;

    let interval = state.flush_interval;
    response.map(|body| flush::coalesce(body, interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::ConnectionInfo;
    use crate::proxy::headers::X_FORWARDED_FOR;
    use crate::proxy::rewrite::CONTENT_SECURITY_POLICY;
    use crate::proxy::transport::{ConnectionErrorHandler, TransportError, BACKEND_UNAVAILABLE_PAGE};
    use axum::http::{HeaderMap, Uri};
    use futures_util::future::BoxFuture;
    use std::io;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Debug, Clone)]
    struct Seen {
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        version: Version,
    }

    enum Reply {
        Body(&'static str),
        Refused,
        Broken,
    }

    struct Recording {
        seen: Arc<Mutex<Vec<Seen>>>,
        reply: Reply,
    }

    impl Transport for Recording {
        fn send(
            &self,
            request: Request<Body>,
        ) -> BoxFuture<'static, Result<Response<Body>, TransportError>> {
            self.seen.lock().unwrap().push(Seen {
                method: request.method().clone(),
                uri: request.uri().clone(),
                headers: request.headers().clone(),
                version: request.version(),
            });
            let result = match self.reply {
                Reply::Body(body) => {
                    let mut response = Response::new(Body::from(body));
                    response
                        .headers_mut()
                        .insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
                    Ok(response)
                }
                Reply::Refused => Err(TransportError::Network(Box::new(io::Error::from(
                    io::ErrorKind::ConnectionRefused,
                )))),
                Reply::Broken => Err(TransportError::Other("protocol violation".into())),
            };
            Box::pin(async move { result })
        }
    }

    struct Harness {
        router: Router,
        targets: Arc<DefaultTarget>,
        seen: Arc<Mutex<Vec<Seen>>>,
    }

    fn harness(reply: Reply) -> Harness {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let targets = Arc::new(DefaultTarget::new(
            BackendTarget::parse("http://default.test:8080/base").unwrap(),
        ));
        let transport = ConnectionErrorHandler::new(Recording {
            seen: Arc::clone(&seen),
            reply,
        });
        let state = ProxyState::new(Arc::clone(&targets), Arc::new(transport));
        Harness {
            router: routes(state),
            targets,
            seen,
        }
    }

    impl Harness {
        async fn call(&self, request: Request<Body>) -> (Response<Body>, Vec<u8>) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let (parts, body) = response.into_parts();
            let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
            (Response::from_parts(parts, Body::empty()), body.to_vec())
        }

        async fn get(&self, uri: &str) -> (Response<Body>, Vec<u8>) {
            self.call(Request::get(uri).body(Body::empty()).unwrap()).await
        }

        fn last(&self) -> Seen {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[tokio::test]
    async fn test_forwards_to_default_target() {
        let h = harness(Reply::Body("hello"));
        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/items?page=2")
            .header(header::HOST, "proxy.example")
            .header(header::CONNECTION, "keep-alive, x-hop")
            .header("x-hop", "1")
            .header("x-custom", "kept")
            .body(Body::from("payload"))
            .unwrap();
        request.extensions_mut().insert(ConnectionInfo::new(
            "10.0.0.1:4000".parse().unwrap(),
            "203.0.113.9:5000".parse().unwrap(),
        ));

        let (response, body) = h.call(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body, b"hello");

        let seen = h.last();
        assert_eq!(seen.method, Method::POST);
        assert_eq!(seen.uri, "http://default.test:8080/base/items?page=2");
        assert_eq!(seen.version, Version::HTTP_11);
        assert!(seen.headers.get(header::HOST).is_none());
        assert!(seen.headers.get(header::CONNECTION).is_none());
        assert!(seen.headers.get("x-hop").is_none());
        assert_eq!(seen.headers["x-custom"], "kept");
        assert_eq!(seen.headers[&X_FORWARDED_FOR], "203.0.113.9");

        assert!(response.headers().get(header::CONNECTION).is_none());
    }

    #[tokio::test]
    async fn test_override_persists_for_later_requests() {
        let h = harness(Reply::Body("ok"));

        h.get("/a?_url=http%3A%2F%2Fother.test%2F&x=1").await;
        let first = h.last();
        assert_eq!(first.uri, "http://other.test/a?x=1");

        h.get("/b").await;
        assert_eq!(h.last().uri, "http://other.test/b");
        assert_eq!(h.targets.load().as_str(), "http://other.test/");
    }

    #[tokio::test]
    async fn test_invalid_override_uses_prior_default() {
        let h = harness(Reply::Body("ok"));

        let (response, _) = h.get("/a?_url=notaurl").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.last().uri, "http://default.test:8080/base/a");
        assert_eq!(h.targets.load().as_str(), "http://default.test:8080/base");
    }

    #[tokio::test]
    async fn test_rewrite_and_policy_headers() {
        let h = harness(Reply::Body("<div class=background>background</div>"));

        let (response, body) = h.get("/page").await;
        assert_eq!(body, b"<div class=Background>Background</div>");
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            body.len().to_string().as_str()
        );
        assert_eq!(
            response.headers()[header::CONTENT_SECURITY_POLICY],
            CONTENT_SECURITY_POLICY
        );
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_refused_backend_gets_rewritten_503_page() {
        let h = harness(Reply::Refused);

        let (response, body) = h.get("/").await;
        let expected = BACKEND_UNAVAILABLE_PAGE.replace("background", "Background");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, expected.as_bytes());
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            expected.len().to_string().as_str()
        );
        assert!(response.headers().contains_key(header::CONTENT_SECURITY_POLICY));
    }

    #[tokio::test]
    async fn test_other_transport_error_is_bare_502() {
        let h = harness(Reply::Broken);

        let (response, body) = h.get("/").await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(body.is_empty());
        assert!(!response.headers().contains_key(header::CONTENT_SECURITY_POLICY));
    }

    #[tokio::test]
    async fn test_version_header_regardless_of_backend() {
        for reply in [Reply::Body("ok"), Reply::Refused, Reply::Broken] {
            let h = harness(reply);
            let (response, _) = h.get(VERSION_PATH).await;
            assert_eq!(response.headers()[&VERSION_HEADER], VERSION);
        }

        let h = harness(Reply::Body("ok"));
        let (response, _) = h.get("/other").await;
        assert!(response.headers().get(&VERSION_HEADER).is_none());
    }
}
