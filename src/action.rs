//! Before- and after-action trees: two parallel pattern collections sharing
//! the route pattern language, matched along the full path rather than only
//! at a leaf, so an action bound to `/a` still runs for a request to
//! `/a/b`.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::cx::ExchangeCx;
use crate::request::Request;
use crate::response::Response;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("an identical (pattern, action) pair is already registered")]
    NonUnique,
    #[error(transparent)]
    Pattern(#[from] crate::route::PatternError),
}

/// What a before-action returns: either it short-circuits with a final
/// response, or it asks the chain to proceed.
pub enum BeforeOutcome {
    Respond(Response),
    Proceed,
}

#[async_trait]
pub trait BeforeAction: Send + Sync {
    /// `declared` is this action's own pattern's parameter names — the
    /// request's path-parameter view rejects anything outside that set,
    /// even if the eventually-resolved route declares more.
    async fn call(&self, request: &Request, declared: &[String], cx: &mut ExchangeCx<'_>) -> BeforeOutcome;
}

/// Adapts a plain synchronous closure that never needs to write interim
/// responses — the common case.
pub struct SyncBeforeAction<F>(F);

#[async_trait]
impl<F: Fn(&Request) -> BeforeOutcome + Send + Sync> BeforeAction for SyncBeforeAction<F> {
    async fn call(&self, request: &Request, _declared: &[String], _cx: &mut ExchangeCx<'_>) -> BeforeOutcome {
        (self.0)(request)
    }
}

/// Builds an `Arc<dyn BeforeAction>` from a synchronous closure.
pub fn sync_before_action<F: Fn(&Request) -> BeforeOutcome + Send + Sync + 'static>(f: F) -> Arc<dyn BeforeAction> {
    Arc::new(SyncBeforeAction(f))
}

pub trait AfterAction: Send + Sync {
    /// `declared` is this action's own pattern's parameter names, passed
    /// through for the same reason as `BeforeAction::call`.
    fn call(&self, request: &Request, declared: &[String], response: Response) -> Response;
}

impl<F: Fn(&Request, Response) -> Response + Send + Sync> AfterAction for F {
    fn call(&self, request: &Request, _declared: &[String], response: Response) -> Response {
        self(request, response)
    }
}

enum Segment {
    Static(String),
    Param(String),
    Catchall(String),
}

fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, crate::route::PatternError> {
    use crate::route::PatternError;
    if !pattern.starts_with('/') {
        return Err(PatternError::MustStartWithSlash);
    }
    if pattern == "/" {
        return Ok(Vec::new());
    }
    if pattern.ends_with('/') {
        return Err(PatternError::MustNotEndWithSlash);
    }
    let raw: Vec<&str> = pattern.trim_start_matches('/').split('/').collect();
    let mut out = Vec::with_capacity(raw.len());
    for (i, seg) in raw.iter().enumerate() {
        if seg.is_empty() {
            return Err(PatternError::EmptySegment);
        }
        if let Some(name) = seg.strip_prefix(':') {
            out.push(Segment::Param(name.to_string()));
        } else if let Some(name) = seg.strip_prefix('*') {
            if i != raw.len() - 1 {
                return Err(PatternError::CatchallNotTerminal);
            }
            out.push(Segment::Catchall(name.to_string()));
        } else {
            out.push(Segment::Static(seg.to_string()));
        }
    }
    Ok(out)
}

fn declared_names(segments: &[Segment]) -> Vec<String> {
    segments
        .iter()
        .filter_map(|s| match s {
            Segment::Param(name) | Segment::Catchall(name) => Some(name.clone()),
            Segment::Static(_) => None,
        })
        .collect()
}

/// One registered action: its source pattern (for matching) plus the
/// boxed callable, identified by `Arc` pointer equality — the closest
/// Rust analogue to reference-identity duplicate detection.
struct Binding<A: ?Sized> {
    pattern: String,
    segments: Vec<Segment>,
    declared: Vec<String>,
    action: Arc<A>,
}

/// An arena-free tree: actions are matched along the full walked path, so
/// rather than indexing into per-segment nodes this keeps one flat list
/// per tree and tests each binding's pattern against the path directly.
/// Equivalent in matching semantics to an arena walk while avoiding a
/// second index structure that adds nothing over a linear scan at
/// registration-time tree sizes.
pub struct ActionTree<A: ?Sized> {
    bindings: Vec<Binding<A>>,
}

impl<A: ?Sized> Default for ActionTree<A> {
    fn default() -> Self {
        ActionTree { bindings: Vec::new() }
    }
}

impl<A: ?Sized> ActionTree<A> {
    pub fn new() -> ActionTree<A> {
        ActionTree::default()
    }

    pub fn add(&mut self, pattern: &str, action: Arc<A>) -> Result<(), ActionError> {
        let segments = parse_pattern(pattern)?;
        for existing in &self.bindings {
            if existing.pattern == pattern && Arc::ptr_eq(&existing.action, &action) {
                return Err(ActionError::NonUnique);
            }
        }
        let declared = declared_names(&segments);
        self.bindings.push(Binding { pattern: pattern.to_string(), segments, declared, action });
        Ok(())
    }

    fn matches(segments: &[Segment], path: &[&str]) -> bool {
        let mut path_idx = 0usize;
        for seg in segments {
            match seg {
                Segment::Catchall(_) => return true,
                Segment::Static(literal) => {
                    if path.get(path_idx) != Some(&literal.as_str()) {
                        return false;
                    }
                    path_idx += 1;
                }
                Segment::Param(_) => {
                    if path_idx >= path.len() {
                        return false;
                    }
                    path_idx += 1;
                }
            }
        }
        path_idx <= path.len()
    }

    /// All bindings whose pattern matches a prefix of `path` (catch-alls)
    /// or the full path (everything else), paired with each binding's own
    /// declared parameter names, in the order they were registered.
    pub fn matching<'a>(&'a self, path: &[&str]) -> Vec<(&'a [String], &'a Arc<A>)> {
        self.bindings
            .iter()
            .filter(|b| Self::matches(&b.segments, path))
            .map(|b| (b.declared.as_slice(), &b.action))
            .collect()
    }
}

/// Before-action invocation order: discovery (root-to-leaf), then
/// insertion — the tree already stores bindings in insertion order, and
/// `matching` preserves that order, so callers just use it directly.
pub fn before_order<'a>(tree: &'a ActionTree<dyn BeforeAction>, path: &[&str]) -> Vec<(&'a [String], &'a Arc<dyn BeforeAction>)> {
    tree.matching(path)
}

/// After-action invocation order: reverse discovery (leaf-to-root), then
/// insertion — the reverse of registration order among matches.
pub fn after_order<'a>(tree: &'a ActionTree<dyn AfterAction>, path: &[&str]) -> Vec<(&'a [String], &'a Arc<dyn AfterAction>)> {
    let mut matched = tree.matching(path);
    matched.reverse();
    matched
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cx::InterimSink;
    use crate::error::EngineError;
    use crate::status::StatusCode;

    struct NullSink;

    #[async_trait]
    impl InterimSink for NullSink {
        async fn write_interim(&mut self, _response: &Response) -> Result<(), EngineError> {
            panic!("test handler wrote an interim response unexpectedly")
        }

        async fn write_final(&mut self, _response: &Response, _method: Option<&crate::method::Method>) -> Result<bool, EngineError> {
            panic!("test handler wrote a final response unexpectedly")
        }
    }

    fn noop_before() -> Arc<dyn BeforeAction> {
        sync_before_action(|_: &Request| BeforeOutcome::Proceed)
    }

    fn noop_after() -> Arc<dyn AfterAction> {
        Arc::new(|_: &Request, r: Response| r)
    }

    #[test]
    fn matches_a_path_prefix_for_every_ancestor_pattern() {
        let mut tree: ActionTree<dyn BeforeAction> = ActionTree::new();
        tree.add("/a", noop_before()).unwrap();
        tree.add("/a/b", noop_before()).unwrap();
        let found = tree.matching(&["a", "b"]);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn declared_names_are_captured_per_binding() {
        let mut tree: ActionTree<dyn BeforeAction> = ActionTree::new();
        tree.add("/users/:id", noop_before()).unwrap();
        tree.add("/users/:id/posts/:post_id", noop_before()).unwrap();
        let found = tree.matching(&["users", "1", "posts", "2"]);
        assert_eq!(found[0].0, &["id".to_string()]);
        assert_eq!(found[1].0, &["id".to_string(), "post_id".to_string()]);
    }

    #[test]
    fn duplicate_pattern_and_action_is_rejected() {
        let mut tree: ActionTree<dyn BeforeAction> = ActionTree::new();
        let action = noop_before();
        tree.add("/a", action.clone()).unwrap();
        let err = tree.add("/a", action).unwrap_err();
        assert_eq!(err, ActionError::NonUnique);
    }

    #[test]
    fn after_actions_run_leaf_to_root() {
        let mut tree: ActionTree<dyn AfterAction> = ActionTree::new();
        let root = noop_after();
        let leaf = noop_after();
        tree.add("/a", root.clone()).unwrap();
        tree.add("/a/b", leaf.clone()).unwrap();
        let order = after_order(&tree, &["a", "b"]);
        assert!(Arc::ptr_eq(order[0].1, &leaf));
        assert!(Arc::ptr_eq(order[1].1, &root));
    }

    #[tokio::test]
    async fn before_action_can_short_circuit() {
        let short_circuit: Arc<dyn BeforeAction> =
            sync_before_action(|_: &Request| BeforeOutcome::Respond(Response::builder(StatusCode::new(403)).build()));
        let mut tree: ActionTree<dyn BeforeAction> = ActionTree::new();
        tree.add("/a", short_circuit).unwrap();
        let matched = tree.matching(&["a"]);
        assert_eq!(matched.len(), 1);
        let mut sink = NullSink;
        let mut cx = ExchangeCx::new(&mut sink);
        let (declared, action) = matched[0];
        match action.call(&test_request(), declared, &mut cx).await {
            BeforeOutcome::Respond(r) => assert_eq!(r.status(), StatusCode::new(403)),
            BeforeOutcome::Proceed => panic!("expected a short-circuit response"),
        }
    }

    #[tokio::test]
    async fn an_undeclared_path_parameter_is_invisible_to_a_shorter_bound_action() {
        // a before-action bound to "/users/:id" must not be able to read
        // "post_id", which only the longer route pattern declares.
        let mut params = crate::path_params::PathParams::new();
        params.insert("id", "7", "7");
        params.insert("post_id", "9", "9");
        let request = Request::new(
            crate::method::Method::get(),
            crate::request::Target::parse("/users/7/posts/9"),
            crate::version::Version::HTTP_11,
            crate::headers::Headers::new(),
            crate::body::Body::empty(),
            params,
        );

        let mut tree: ActionTree<dyn BeforeAction> = ActionTree::new();
        tree.add(
            "/users/:id",
            sync_before_action(|_: &Request| BeforeOutcome::Proceed),
        )
        .unwrap();
        let matched = tree.matching(&["users", "7", "posts", "9"]);
        let (declared, _action) = matched[0];

        assert_eq!(declared, &["id".to_string()]);
        assert_eq!(request.path_params(declared).decoded("id"), Ok("7"));
        assert!(request.path_params(declared).decoded("post_id").is_err());
    }

    fn test_request() -> Request {
        Request::new(
            crate::method::Method::get(),
            crate::request::Target::parse("/a"),
            crate::version::Version::HTTP_11,
            crate::headers::Headers::new(),
            crate::body::Body::empty(),
            crate::path_params::PathParams::new(),
        )
    }
}
