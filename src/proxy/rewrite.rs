//! Response rewrite pipeline.
//!
//! Every response relayed to a client passes through [`RewritePipeline::apply`]
//! exactly once, synthetic 503 pages included:
//!
//! ```text
//! drain body → rules (in order) → exact Content-Length → CSP + CORS headers
//! ```
//!
//! A body that fails mid-read is not retried. The client gets the backend
//! status and headers followed by a body that errors immediately, so the
//! server aborts the response.

use axum::body::{Body, Bytes};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Method, Response, StatusCode};

use crate::observability::metrics;

pub const CONTENT_SECURITY_POLICY: &str = "default-src * 'unsafe-inline' 'unsafe-eval'; img-src * data:; script-src * ; script-src-elem * 'unsafe-inline' ; font-src * data:";

pub const ALLOW_ORIGIN: &str = "*";

#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("failed to read backend response body: {0}")]
    Body(#[source] axum::Error),
}

/// A body transformation guarded by a predicate on the response headers.
pub trait RewriteRule: Send + Sync {
    fn applies(&self, headers: &HeaderMap) -> bool;

    fn rewrite(&self, body: Bytes) -> Bytes;
}

/// Replace every occurrence of one byte string with another.
///
/// Skips bodies with a non-identity `Content-Encoding`, where a byte-level
/// replacement would corrupt the payload.
#[derive(Debug, Clone)]
pub struct ReplaceLiteral {
    from: Vec<u8>,
    to: Vec<u8>,
}

impl ReplaceLiteral {
    pub fn new(from: impl Into<Vec<u8>>, to: impl Into<Vec<u8>>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl RewriteRule for ReplaceLiteral {
    fn applies(&self, headers: &HeaderMap) -> bool {
        headers
            .get(header::CONTENT_ENCODING)
            .map_or(true, |encoding| encoding.as_bytes().eq_ignore_ascii_case(b"identity"))
    }

    fn rewrite(&self, body: Bytes) -> Bytes {
        if self.from.is_empty() {
            return body;
        }

        let mut out = Vec::with_capacity(body.len());
        let mut rest = &body[..];
        let mut replaced = false;
        while let Some(at) = find(rest, &self.from) {
            out.extend_from_slice(&rest[..at]);
            out.extend_from_slice(&self.to);
            rest = &rest[at + self.from.len()..];
            replaced = true;
        }

        if !replaced {
            return body;
        }
        out.extend_from_slice(rest);
        Bytes::from(out)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Ordered list of rewrite rules plus the fixed header policy.
pub struct RewritePipeline {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl Default for RewritePipeline {
    fn default() -> Self {
        Self::new().with_rule(ReplaceLiteral::new("background", "Background"))
    }
}

impl RewritePipeline {
    /// A pipeline with no body rules; headers are still added.
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: impl RewriteRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn rewrite(&self, headers: &HeaderMap, mut body: Bytes) -> Bytes {
        for rule in &self.rules {
            if rule.applies(headers) {
                body = rule.rewrite(body);
            }
        }
        body
    }

    /// Rewrite a response for a request made with `method`.
    pub async fn apply(&self, response: Response<Body>, method: &Method) -> Response<Body> {
        let (mut parts, body) = response.into_parts();
        append_policy_headers(&mut parts.headers);

        if !carries_body(method, parts.status) {
            return Response::from_parts(parts, body);
        }

        match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => {
                let bytes = self.rewrite(&parts.headers, bytes);
                parts
                    .headers
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                Response::from_parts(parts, Body::from(bytes))
            }
            Err(e) => {
                let err = RewriteError::Body(e);
                tracing::warn!(
                    status = parts.status.as_u16(),
                    error = %err,
                    "Response rewrite aborted"
                );
                metrics::record_rewrite_aborted();
                parts.headers.remove(header::CONTENT_LENGTH);
                Response::from_parts(parts, aborted(err))
            }
        }
    }
}

/// Append (never replace) the permissive CSP and CORS headers.
pub fn append_policy_headers(headers: &mut HeaderMap) {
    headers.append(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );
    headers.append(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(ALLOW_ORIGIN),
    );
}

fn carries_body(method: &Method, status: StatusCode) -> bool {
    *method != Method::HEAD
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
        && !status.is_informational()
}

fn aborted(err: RewriteError) -> Body {
    Body::from_stream(futures_util::stream::once(async move {
        Err::<Bytes, _>(err)
    }))
}
