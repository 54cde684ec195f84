//! The immutable, per-exchange `Request`.

use std::sync::Arc;

use crate::attributes::Attributes;
use crate::body::Body;
use crate::headers::Headers;
use crate::method::Method;
use crate::path_params::{PathParamError, PathParams, ScopedPathParams};
use crate::version::Version;

/// The raw request target plus its parsed shape: path segments (still
/// percent-encoded) and the query string, if any.
#[derive(Debug, Clone)]
pub struct Target {
    raw: String,
    path_segments: Vec<String>,
    query: Option<String>,
}

impl Target {
    pub fn parse(raw: &str) -> Target {
        let (path, query) = match raw.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (raw, None),
        };
        let path_segments = if path == "/" || path.is_empty() {
            Vec::new()
        } else {
            path.trim_start_matches('/').split('/').map(str::to_string).collect()
        };
        Target { raw: raw.to_string(), path_segments, query }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn path_segments(&self) -> &[String] {
        &self.path_segments
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }
}

/// A single inbound request. Built once per exchange from the parsed head,
/// a lazily-readable body, a typed attribute bag, and the full set of path
/// parameters captured by the route match — before-actions, the handler,
/// and after-actions all share this one instance.
pub struct Request {
    method: Method,
    target: Target,
    version: Version,
    headers: Headers,
    body: Body,
    attributes: std::sync::Mutex<Attributes>,
    path_params: PathParams,
}

impl Request {
    pub fn new(method: Method, target: Target, version: Version, headers: Headers, body: Body, path_params: PathParams) -> Request {
        Request { method, target, version, headers, body, attributes: std::sync::Mutex::new(Attributes::new()), path_params }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Path parameters visible to the entity currently executing, scoped to
    /// the names `declared` by its own pattern.
    pub fn path_params<'a>(&'a self, declared: &'a [String]) -> ScopedPathParams<'a> {
        self.path_params.scoped(declared)
    }

    /// A path-parameter view that always fails — used by the exception
    /// chain when no route was matched.
    pub fn unmatched_path_params(&self) -> ScopedPathParams<'static> {
        self.path_params.scoped(&[])
    }

    pub fn attribute<T: std::any::Any + Send + Sync + Clone>(&self) -> Option<T> {
        self.attributes.lock().expect("attribute lock poisoned").get::<T>().cloned()
    }

    pub fn set_attribute<T: std::any::Any + Send + Sync>(&self, value: T) -> Option<T> {
        self.attributes.lock().expect("attribute lock poisoned").insert(value)
    }

    pub fn with_attribute_mut<T: std::any::Any + Send + Sync, R>(&self, f: impl FnOnce(Option<&mut T>) -> R) -> R {
        let mut guard = self.attributes.lock().expect("attribute lock poisoned");
        f(guard.get_mut::<T>())
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("target", &self.target.raw)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Surfaced to an entity that tries to read an undeclared path parameter;
/// re-exported here for callers that only import `request`.
pub type PathParamAccessError = PathParamError;

pub type SharedRequest = Arc<Request>;
