//! Route tree: a hierarchical matcher over path segments, stored as an
//! arena — children are indexed by id, edges are plain indices into the
//! node vector, so there is no removal operation to worry about freeing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use thiserror::Error;

use crate::cx::ExchangeCx;
use crate::media::MediaSpec;
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern must begin with `/`")]
    MustStartWithSlash,
    #[error("pattern must not end with `/` (except the root `/`)")]
    MustNotEndWithSlash,
    #[error("pattern must not contain empty segments")]
    EmptySegment,
    #[error("`*catchall` must be the terminal segment")]
    CatchallNotTerminal,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("hierarchical position occupied with non-compatible type")]
    PositionOccupied,
    #[error("a route with an equivalent identity already exists")]
    EquivalentRoute,
    #[error(transparent)]
    Pattern(#[from] PatternError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("no route matches this path")]
    NoRouteFound,
}

/// One parsed pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Static(String),
    Param(String),
    Catchall(String),
}

fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, PatternError> {
    if !pattern.starts_with('/') {
        return Err(PatternError::MustStartWithSlash);
    }
    if pattern == "/" {
        return Ok(Vec::new());
    }
    if pattern.ends_with('/') {
        return Err(PatternError::MustNotEndWithSlash);
    }
    let raw_segments: Vec<&str> = pattern.trim_start_matches('/').split('/').collect();
    let mut segments = Vec::with_capacity(raw_segments.len());
    for (i, raw) in raw_segments.iter().enumerate() {
        if raw.is_empty() {
            return Err(PatternError::EmptySegment);
        }
        let seg = if let Some(name) = raw.strip_prefix(':') {
            Segment::Param(name.to_string())
        } else if let Some(name) = raw.strip_prefix('*') {
            if i != raw_segments.len() - 1 {
                return Err(PatternError::CatchallNotTerminal);
            }
            Segment::Catchall(name.to_string())
        } else {
            Segment::Static(raw.to_string())
        };
        segments.push(seg);
    }
    Ok(segments)
}

/// A request handler: receives the request, the route's own declared path
/// parameter names, and the scoped channel capability, and either returns a
/// final response or writes one (or more interim ones) directly via `cx`
/// and returns `None` as the explicit "already written" sentinel.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, request: &Request, declared: &[String], cx: &mut ExchangeCx<'_>) -> Option<Response>;
}

/// Adapts a plain synchronous closure that never needs to write interim
/// responses — the common case.
pub struct SyncHandler<F>(F);

#[async_trait]
impl<F: Fn(&Request) -> Response + Send + Sync> Handler for SyncHandler<F> {
    async fn call(&self, request: &Request, _declared: &[String], _cx: &mut ExchangeCx<'_>) -> Option<Response> {
        Some((self.0)(request))
    }
}

/// Builds a [`HandlerFn`] from a synchronous closure.
pub fn sync_handler<F: Fn(&Request) -> Response + Send + Sync + 'static>(f: F) -> HandlerFn {
    Arc::new(SyncHandler(f))
}

/// The handler-set key: (method, consumes, produces), required unique per
/// route.
pub type HandlerFn = Arc<dyn Handler>;

#[derive(Clone)]
pub struct HandlerEntry {
    pub method: Method,
    pub consumes: MediaSpec,
    pub produces: mime::Mime,
    pub handler: HandlerFn,
}

/// A registered route: its pattern (for path-param naming) and its set of
/// handlers.
pub struct Route {
    pub pattern: Vec<Segment>,
    pub param_names: Vec<String>,
    pub handlers: Vec<HandlerEntry>,
}

impl Route {
    /// The identity used for collision detection: the pattern reduced to
    /// its literal segments only. Parameter names do not participate, so
    /// `/hello/:name` and `/hello/:other` collide.
    fn identity(segments: &[Segment]) -> Vec<&'static str> {
        segments
            .iter()
            .map(|s| match s {
                Segment::Static(_) => "static",
                Segment::Param(_) => "param",
                Segment::Catchall(_) => "catchall",
            })
            .collect()
    }
}

#[derive(Default)]
struct Node {
    statics: HashMap<String, usize>,
    param: Option<(String, usize)>,
    catchall: Option<(String, usize)>,
    route: Option<usize>,
}

/// Arena of [`Node`]s plus the flat list of registered [`Route`]s. No
/// removal operation is exposed, so the arena never compacts or frees
/// node slots.
#[derive(Default)]
pub struct RouteTree {
    nodes: Vec<Node>,
    routes: Vec<Route>,
}

impl RouteTree {
    pub fn new() -> RouteTree {
        let mut tree = RouteTree { nodes: Vec::new(), routes: Vec::new() };
        tree.nodes.push(Node::default());
        tree
    }

    /// Registers a new route for `pattern`. Fails with
    /// [`RouteError::EquivalentRoute`] if a route with the same identity
    /// already exists, or [`RouteError::PositionOccupied`] if a
    /// non-compatible sibling occupies the same tree position.
    pub fn add(&mut self, pattern: &str) -> Result<usize, RouteError> {
        let segments = parse_pattern(pattern)?;
        let param_names = segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(name) | Segment::Catchall(name) => Some(name.clone()),
                Segment::Static(_) => None,
            })
            .collect();

        let mut node_idx = 0usize;
        for segment in &segments {
            node_idx = self.descend_or_create(node_idx, segment)?;
        }

        if self.nodes[node_idx].route.is_some() {
            let existing = self.nodes[node_idx].route.unwrap();
            if Route::identity(&self.routes[existing].pattern) == Route::identity(&segments) {
                return Err(RouteError::EquivalentRoute);
            }
        }

        let route = Route { pattern: segments, param_names, handlers: Vec::new() };
        let route_idx = self.routes.len();
        self.routes.push(route);
        self.nodes[node_idx].route = Some(route_idx);
        Ok(route_idx)
    }

    fn descend_or_create(&mut self, node_idx: usize, segment: &Segment) -> Result<usize, RouteError> {
        match segment {
            Segment::Static(literal) => {
                if self.nodes[node_idx].param.is_some() {
                    return Err(RouteError::PositionOccupied);
                }
                if let Some(&child) = self.nodes[node_idx].statics.get(literal) {
                    return Ok(child);
                }
                let child_idx = self.new_node();
                self.nodes[node_idx].statics.insert(literal.clone(), child_idx);
                Ok(child_idx)
            }
            Segment::Param(name) => {
                if !self.nodes[node_idx].statics.is_empty() {
                    return Err(RouteError::PositionOccupied);
                }
                if let Some((_, child)) = &self.nodes[node_idx].param {
                    // Reuse the slot regardless of the declared name: the
                    // name is not part of a node's structural identity.
                    let _ = name;
                    return Ok(*child);
                }
                let child_idx = self.new_node();
                self.nodes[node_idx].param = Some((name.clone(), child_idx));
                Ok(child_idx)
            }
            Segment::Catchall(name) => {
                if let Some((_, child)) = &self.nodes[node_idx].catchall {
                    return Ok(*child);
                }
                let child_idx = self.new_node();
                self.nodes[node_idx].catchall = Some((name.clone(), child_idx));
                Ok(child_idx)
            }
        }
    }

    fn new_node(&mut self) -> usize {
        self.nodes.push(Node::default());
        self.nodes.len() - 1
    }

    pub fn route(&self, idx: usize) -> &Route {
        &self.routes[idx]
    }

    pub fn route_mut(&mut self, idx: usize) -> &mut Route {
        &mut self.routes[idx]
    }

    /// Looks up the route matching `path_segments` (raw, percent-encoded).
    /// Returns the matched route index, the raw captured values, and the
    /// same values percent-decoded.
    pub fn lookup(&self, path_segments: &[&str]) -> Result<(usize, Vec<(String, String, String)>), LookupError> {
        self.lookup_from(0, path_segments, Vec::new())
    }

    fn lookup_from(
        &self,
        node_idx: usize,
        remaining: &[&str],
        mut captured: Vec<(String, String, String)>,
    ) -> Result<(usize, Vec<(String, String, String)>), LookupError> {
        let node = &self.nodes[node_idx];
        if remaining.is_empty() {
            return node.route.map(|r| (r, captured)).ok_or(LookupError::NoRouteFound);
        }
        let (head, rest) = (remaining[0], &remaining[1..]);

        if let Some(&child) = node.statics.get(head) {
            if let Ok(found) = self.lookup_from(child, rest, captured.clone()) {
                return Ok(found);
            }
        }
        if let Some((name, child)) = &node.param {
            let decoded = percent_decode_str(head).decode_utf8_lossy().into_owned();
            let mut next = captured.clone();
            next.push((name.clone(), head.to_string(), decoded));
            if let Ok(found) = self.lookup_from(*child, rest, next) {
                return Ok(found);
            }
        }
        if let Some((name, child)) = &node.catchall {
            let raw_tail = remaining.join("/");
            let decoded = percent_decode_str(&raw_tail).decode_utf8_lossy().into_owned();
            captured.push((name.clone(), raw_tail, decoded));
            return self.nodes[*child].route.map(|r| (r, captured)).ok_or(LookupError::NoRouteFound);
        }
        Err(LookupError::NoRouteFound)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registers_and_looks_up_a_static_route() {
        let mut tree = RouteTree::new();
        let idx = tree.add("/hello").unwrap();
        let (found, captured) = tree.lookup(&["hello"]).unwrap();
        assert_eq!(found, idx);
        assert!(captured.is_empty());
    }

    #[test]
    fn param_segment_captures_raw_and_decoded_value() {
        let mut tree = RouteTree::new();
        let idx = tree.add("/hello/:name").unwrap();
        let (found, captured) = tree.lookup(&["hello", "John%20Doe"]).unwrap();
        assert_eq!(found, idx);
        assert_eq!(captured, vec![("name".to_string(), "John%20Doe".to_string(), "John Doe".to_string())]);
    }

    #[test]
    fn catchall_consumes_the_remaining_segments() {
        let mut tree = RouteTree::new();
        tree.add("/files/*rest").unwrap();
        let (_, captured) = tree.lookup(&["files", "a", "b"]).unwrap();
        assert_eq!(captured[0].1, "a/b");
    }

    #[test]
    fn missing_route_fails_with_no_route_found() {
        let tree = RouteTree::new();
        assert_eq!(tree.lookup(&["nope"]).unwrap_err(), LookupError::NoRouteFound);
    }

    #[test]
    fn duplicate_identity_is_rejected() {
        let mut tree = RouteTree::new();
        tree.add("/hello/:name").unwrap();
        let err = tree.add("/hello/:other").unwrap_err();
        assert_eq!(err, RouteError::EquivalentRoute);
    }

    #[test]
    fn param_sibling_next_to_an_existing_static_segment_collides() {
        let mut tree = RouteTree::new();
        tree.add("/hello/world").unwrap();
        let err = tree.add("/hello/:name").unwrap_err();
        assert_eq!(err, RouteError::PositionOccupied);
    }

    #[test]
    fn pattern_must_start_with_slash() {
        let mut tree = RouteTree::new();
        assert_eq!(tree.add("hello").unwrap_err(), RouteError::Pattern(PatternError::MustStartWithSlash));
    }

    #[test]
    fn root_pattern_matches_empty_path() {
        let mut tree = RouteTree::new();
        tree.add("/").unwrap();
        let (_, captured) = tree.lookup(&[]).unwrap();
        assert!(captured.is_empty());
    }
}
