//! Backend targets and the runtime default.
//!
//! # Responsibilities
//! - Parse and validate backend URLs
//! - Map an inbound request URI onto a target (path join, query merge)
//! - Hold the process-wide default target and apply `_url` overrides
//!
//! # Design Decisions
//! - The default target lives behind `ArcSwap`: each request loads one
//!   snapshot, an override swaps in a new one, last writer wins
//! - A malformed override is logged and ignored; the client never sees it

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::Uri;
use url::{form_urlencoded, Url};

use crate::observability::metrics;

/// Query parameter that replaces the default backend.
pub const OVERRIDE_PARAM: &str = "_url";

/// Why a backend URL was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("invalid URL: {0}")]
    Parse(#[from] url::ParseError),
    #[error("unsupported scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("cannot build request URI: {0}")]
    InvalidUri(String),
}

/// An absolute `http`/`https` backend URL, optionally with a path prefix and
/// query that every forwarded request inherits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    url: Url,
}

impl BackendTarget {
    pub fn parse(raw: &str) -> Result<Self, TargetError> {
        let url = Url::parse(raw.trim())?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(TargetError::UnsupportedScheme(other.to_string())),
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(TargetError::MissingHost);
        }

        Ok(Self { url })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// `host[:port]`, the value a backend expects in `Host`. Default ports
    /// are omitted.
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Build the outbound URI for an inbound request URI.
    ///
    /// The path is the target path joined to the request path with exactly
    /// one slash between them. The query is the target query followed by the
    /// request query, with every override parameter removed.
    pub fn request_uri(&self, inbound: &Uri) -> Result<Uri, TargetError> {
        let path = join_paths(self.url.path(), inbound.path());
        let request_query = inbound.query().map(strip_override).unwrap_or_default();
        let query = merge_queries(self.url.query().unwrap_or_default(), &request_query);

        let mut uri = format!("{}://{}{}", self.scheme(), self.authority(), path);
        if !query.is_empty() {
            uri.push('?');
            uri.push_str(&query);
        }

        uri.parse::<Uri>()
            .map_err(|e| TargetError::InvalidUri(e.to_string()))
    }
}

impl std::fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl std::str::FromStr for BackendTarget {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

fn merge_queries(target: &str, request: &str) -> String {
    if target.is_empty() || request.is_empty() {
        format!("{target}{request}")
    } else {
        format!("{target}&{request}")
    }
}

/// Remove every override pair from a raw query, leaving the rest verbatim.
pub fn strip_override(query: &str) -> String {
    query
        .split('&')
        .filter(|pair| {
            form_urlencoded::parse(pair.as_bytes())
                .next()
                .map_or(true, |(key, _)| key != OVERRIDE_PARAM)
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// The decoded value of the first override parameter, if it is non-empty.
pub fn override_value(query: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == OVERRIDE_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// The process-wide default backend.
#[derive(Debug)]
pub struct DefaultTarget {
    current: ArcSwap<BackendTarget>,
}

impl DefaultTarget {
    pub fn new(initial: BackendTarget) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// Snapshot of the current default.
    pub fn load(&self) -> Arc<BackendTarget> {
        self.current.load_full()
    }

    /// Replace the default for every request that resolves afterwards.
    pub fn store(&self, target: BackendTarget) -> Arc<BackendTarget> {
        let target = Arc::new(target);
        self.current.store(Arc::clone(&target));
        target
    }

    /// Resolve the target for a request with the given raw query.
    ///
    /// A valid override becomes the new default and is returned; an invalid
    /// one is logged and the current default is returned.
    pub fn resolve(&self, query: Option<&str>) -> Arc<BackendTarget> {
        let Some(raw) = query.and_then(override_value) else {
            return self.load();
        };

        match BackendTarget::parse(&raw) {
            Ok(target) => {
                tracing::info!(backend = %target, "Default backend replaced by override");
                metrics::record_backend_override("applied");
                self.store(target)
            }
            Err(e) => {
                let current = self.load();
                tracing::warn!(
                    value = %raw,
                    error = %e,
                    backend = %current,
                    "Ignoring invalid backend override"
                );
                metrics::record_backend_override("invalid");
                current
            }
        }
    }
}
