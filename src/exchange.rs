//! Exchange state machine: drives one HTTP exchange over an
//! already-accepted `Channel`, from head-read through response-write, as a
//! chain of executing entities (before-actions, the resolved handler,
//! after-actions) any of which may short-circuit, write directly, or throw.

use std::str::FromStr;
use std::sync::Arc;

use futures::FutureExt as _;
use mime::Mime;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::action::{after_order, before_order, ActionError, ActionTree, AfterAction, BeforeAction, BeforeOutcome};
use crate::body::{Body, BodyKind};
use crate::channel::{Channel, ChannelError};
use crate::config::Config;
use crate::cx::{ChannelSink, ExchangeCx};
use crate::error::{EngineError, ParseError, RoutingError, SizeLimitError, TimeoutError, VersionError};
use crate::events::{Events, RequestHeadParsed};
use crate::exception::{ExceptionChain, ExceptionHandler};
use crate::headers::Headers;
use crate::lock::PathLockTable;
use crate::media::MediaSpec;
use crate::method::Method;
use crate::negotiate::{self, ResolveError};
use crate::parse::{self, HeadParseError};
use crate::path_params::PathParams;
use crate::request::{Request, Target};
use crate::response::Response;
use crate::route::{HandlerEntry, HandlerFn, RouteError, RouteTree};
use crate::status::StatusCode;
use crate::version::Version;
use crate::writer;

/// States a single exchange passes through. Kept as an explicit enum for
/// `tracing` fields and assertions rather than a type-state: the
/// chain-of-entities shape does not fit one linear type parameter the way
/// a byte-parser's states do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    RecvHead,
    Resolving,
    Running,
    Writing,
    Closing,
    Idle,
}

/// An entity in the before/handler/after chain panicked. Caught at the
/// call site and folded into the normal exception-chain path rather than
/// unwinding through the connection loop.
#[derive(Debug, Error)]
#[error("an executing entity panicked")]
struct EntityPanicked;

/// The shared, long-lived registration surface: routes, actions, the
/// exception chain, and the event hub. Registrations are mutable at
/// runtime under the registry's own locking, hence the async `RwLock`s
/// rather than a build-once-then-freeze snapshot like `Config`.
pub struct Engine {
    config: Arc<Config>,
    routes: RwLock<RouteTree>,
    before: RwLock<ActionTree<dyn BeforeAction>>,
    after: RwLock<ActionTree<dyn AfterAction>>,
    exceptions: RwLock<ExceptionChain>,
    events: Events,
    locks: Arc<PathLockTable>,
}

impl Engine {
    pub fn new(config: Config) -> Engine {
        let config = Arc::new(config);
        Engine {
            exceptions: RwLock::new(ExceptionChain::new(config.clone())),
            config,
            routes: RwLock::new(RouteTree::new()),
            before: RwLock::new(ActionTree::new()),
            after: RwLock::new(ActionTree::new()),
            events: Events::new(),
            locks: Arc::new(PathLockTable::new()),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn events(&self) -> &Events {
        &self.events
    }

    pub fn path_locks(&self) -> Arc<PathLockTable> {
        self.locks.clone()
    }

    /// Registers a new route pattern, returning the index handlers are
    /// attached to via [`Engine::add_handler`].
    pub async fn add_route(&self, pattern: &str) -> Result<usize, RouteError> {
        self.routes.write().await.add(pattern)
    }

    /// Attaches one handler to an already-registered route. Fails with
    /// [`RoutingError::HandlerCollision`] if an equal (method, consumes,
    /// produces) tuple is already registered on it.
    pub async fn add_handler(
        &self,
        route_idx: usize,
        method: Method,
        consumes: MediaSpec,
        produces: Mime,
        handler: HandlerFn,
    ) -> Result<(), RoutingError> {
        let mut routes = self.routes.write().await;
        let route = routes.route_mut(route_idx);
        let collides = route.handlers.iter().any(|h| h.method == method && h.consumes == consumes && h.produces == produces);
        if collides {
            return Err(RoutingError::HandlerCollision);
        }
        route.handlers.push(HandlerEntry { method, consumes, produces, handler });
        Ok(())
    }

    pub async fn before(&self, pattern: &str, action: Arc<dyn BeforeAction>) -> Result<(), ActionError> {
        self.before.write().await.add(pattern, action)
    }

    pub async fn after(&self, pattern: &str, action: Arc<dyn AfterAction>) -> Result<(), ActionError> {
        self.after.write().await.add(pattern, action)
    }

    pub async fn exception_handler(&self, handler: Arc<dyn ExceptionHandler>) {
        self.exceptions.write().await.register(handler);
    }
}

/// Drives one connection to completion: repeatedly runs exchanges until a
/// loop-exit condition fires (`Connection: close` sent or received, a
/// stream shutdown observed, the idle timeout elapses, or the caller
/// signals stop), then closes the channel.
pub async fn drive_connection<S: AsyncRead + AsyncWrite + Unpin + Send>(engine: Arc<Engine>, socket: S) {
    let mut channel = Channel::new(socket);
    loop {
        match run_one_exchange(&engine, &mut channel).await {
            ExchangeOutcome::Continue => continue,
            ExchangeOutcome::Close => break,
        }
    }
    channel.close().await;
}

enum ExchangeOutcome {
    Continue,
    Close,
}

async fn run_one_exchange<S: AsyncRead + AsyncWrite + Unpin + Send>(engine: &Engine, channel: &mut Channel<S>) -> ExchangeOutcome {
    let config = engine.config();

    debug!(state = ?ExchangeState::RecvHead, "waiting for the next request");
    let idle_deadline = Instant::now() + config.timeout_idle_connection;
    match channel.wait_for_data(idle_deadline).await {
        Ok(true) => {}
        Ok(false) => return ExchangeOutcome::Close,
        Err(_) => return ExchangeOutcome::Close,
    }

    let head_deadline = Instant::now() + config.timeout_request_head;
    let head_bytes = match channel.read_until_crlfcrlf(config.max_request_head_size, head_deadline).await {
        Ok(bytes) => bytes,
        Err(ChannelError::DeadlineElapsed) => {
            respond_to_error(engine, channel, EngineError::Timeout(TimeoutError::RequestHeadTimeout), None, None).await;
            return ExchangeOutcome::Close;
        }
        Err(ChannelError::LimitExceeded) => {
            respond_to_error(engine, channel, EngineError::SizeLimit(SizeLimitError::RequestHeadSizeExceeded), None, None).await;
            return ExchangeOutcome::Close;
        }
        Err(_) => return ExchangeOutcome::Close,
    };

    let parsed = match parse::parse_head(&head_bytes, config.max_request_head_size, config.max_header_count) {
        Ok(parsed) => parsed,
        Err(err) => {
            respond_to_error(engine, channel, map_head_parse_error(err), None, None).await;
            return ExchangeOutcome::Close;
        }
    };
    engine.events().emit(&RequestHeadParsed { method: parsed.method.clone(), target: parsed.target.clone() });
    let version = parsed.version;

    if config.reject_clients_using_1_0 && version == Version::HTTP_10 {
        respond_to_error(engine, channel, EngineError::Version(VersionError::HttpVersionRejected), None, Some(version)).await;
        return ExchangeOutcome::Close;
    }

    let body_kind = match body_kind_from_headers(&parsed.headers) {
        Ok(kind) => kind,
        Err(err) => {
            respond_to_error(engine, channel, err, None, Some(version)).await;
            return ExchangeOutcome::Close;
        }
    };
    let content_type = match parse_content_type(&parsed.headers) {
        Ok(ct) => ct,
        Err(err) => {
            respond_to_error(engine, channel, err, None, Some(version)).await;
            return ExchangeOutcome::Close;
        }
    };
    let request_wants_close = parsed.headers.has_connection_close();
    let accept_header = parsed.headers.get("accept").map(str::to_string);
    let wants_continue = !config.auto_continue_expect_100 && expects_continue(&parsed.headers);

    let target = Target::parse(&parsed.target);
    let path_segments: Vec<String> = target.path_segments().to_vec();
    let path_seg_refs: Vec<&str> = path_segments.iter().map(String::as_str).collect();

    let (route_idx, path_params) = {
        let routes = engine.routes.read().await;
        match routes.lookup(&path_seg_refs) {
            Ok((idx, captured)) => {
                let mut params = PathParams::new();
                for (name, raw, decoded) in captured {
                    params.insert(name, raw, decoded);
                }
                (Some(idx), params)
            }
            Err(_) => (None, PathParams::new()),
        }
    };

    let method = parsed.method.clone();
    let body = Body::new(body_kind);
    let request = Request::new(method.clone(), target, version, parsed.headers, body, path_params);

    if config.auto_continue_expect_100 && expects_continue(request.headers()) {
        let continue_response = Response::builder(StatusCode::CONTINUE).build();
        if write_final(engine, channel, &continue_response, Some(version), Some(&method)).await.is_err() {
            return ExchangeOutcome::Close;
        }
    }

    debug!(state = ?ExchangeState::Running, method = %method, target = %request.target().raw(), "running the before/handler chain");
    let chain_outcome =
        run_chain(engine, channel, config, version, route_idx, &method, content_type.as_ref(), accept_header.as_deref(), wants_continue, &path_seg_refs, &request)
            .await;

    let response = match chain_outcome {
        ChainOutcome::Response(response) => response,
        ChainOutcome::AlreadyWritten { must_close } => {
            return if must_close || request_wants_close { ExchangeOutcome::Close } else { ExchangeOutcome::Continue };
        }
        ChainOutcome::Error(error) => {
            let must_close = respond_to_error(engine, channel, error, Some(&request), Some(version)).await;
            return if must_close || request_wants_close { ExchangeOutcome::Close } else { ExchangeOutcome::Continue };
        }
    };

    let response = run_after_actions(engine, &path_seg_refs, &request, response).await;
    let response = propagate_close(response, request_wants_close);

    debug!(state = ?ExchangeState::Writing, status = response.status().as_u16(), "writing the final response");
    match write_final(engine, channel, &response, Some(version), Some(&method)).await {
        Ok(must_close) if must_close || request_wants_close => ExchangeOutcome::Close,
        Ok(_) => ExchangeOutcome::Continue,
        Err(()) => ExchangeOutcome::Close,
    }
}

/// What running the before-actions/handler chain produced: a response to
/// carry into after-actions, a handler-initiated direct write (the
/// "already written" sentinel), or an error to route through the
/// exception chain.
enum ChainOutcome {
    Response(Response),
    AlreadyWritten { must_close: bool },
    Error(EngineError),
}

/// Drives before-actions and the resolved handler, both of which may write
/// interim responses through a shared [`ExchangeCx`] scoped to this one
/// call. Owns the channel borrow for its whole body so the caller regains
/// direct access to `channel` as soon as it returns.
#[allow(clippy::too_many_arguments)]
async fn run_chain<S: AsyncRead + AsyncWrite + Unpin + Send>(
    engine: &Engine,
    channel: &mut Channel<S>,
    config: &Config,
    version: Version,
    route_idx: Option<usize>,
    method: &Method,
    content_type: Option<&Mime>,
    accept_header: Option<&str>,
    wants_continue: bool,
    path: &[&str],
    request: &Request,
) -> ChainOutcome {
    let mut sink = ChannelSink::new(channel, Some(version), config.timeout_response, engine.events());
    let mut cx = ExchangeCx::new(&mut sink);

    let short_circuit = match run_before_actions(engine, path, request, &mut cx).await {
        Ok(outcome) => outcome,
        Err(error) => return ChainOutcome::Error(error),
    };
    if let Some(response) = short_circuit {
        return ChainOutcome::Response(response);
    }

    debug!(state = ?ExchangeState::Resolving, "resolving a handler");
    let (handler, declared) = match resolve_handler(engine, route_idx, method, content_type, accept_header).await {
        Ok(resolved) => resolved,
        Err(error) => return ChainOutcome::Error(error),
    };

    if wants_continue && !cx.continue_already_sent() {
        let continue_response = Response::builder(StatusCode::CONTINUE).build();
        if let Err(error) = cx.send_interim(continue_response).await {
            return ChainOutcome::Error(error);
        }
    }

    match call_entity_async(handler.call(request, &declared, &mut cx)).await {
        Ok(Some(response)) => ChainOutcome::Response(response),
        Ok(None) => {
            let must_close = match cx.take_final_write() {
                Some(must_close) => must_close,
                None => {
                    warn!("handler returned the already-written sentinel without writing a final response");
                    true
                }
            };
            ChainOutcome::AlreadyWritten { must_close }
        }
        Err(error) => ChainOutcome::Error(error),
    }
}

/// Runs the matching before-actions in order, stopping at the first
/// short-circuit response. Each action receives only the parameter names
/// declared by its own registered pattern, not the eventually-resolved
/// route's. A panicking before-action is reported as a thrown exception,
/// same as any other `EngineError`.
async fn run_before_actions(
    engine: &Engine,
    path: &[&str],
    request: &Request,
    cx: &mut ExchangeCx<'_>,
) -> Result<Option<Response>, EngineError> {
    let before = engine.before.read().await;
    for (declared, action) in before_order(&before, path) {
        match call_entity_async(action.call(request, declared, cx)).await? {
            BeforeOutcome::Respond(response) => return Ok(Some(response)),
            BeforeOutcome::Proceed => continue,
        }
    }
    Ok(None)
}

/// Runs the matching after-actions leaf-to-root over the given response,
/// each scoped to its own pattern's declared parameter names. An
/// after-action must not throw; one that panics anyway is skipped (with a
/// warning), and the response it would have transformed is passed through
/// unchanged to the remaining after-actions.
async fn run_after_actions(engine: &Engine, path: &[&str], request: &Request, response: Response) -> Response {
    let after = engine.after.read().await;
    let mut response = response;
    for (declared, action) in after_order(&after, path) {
        response = match call_entity(|| action.call(request, declared, response.clone())) {
            Ok(next) => next,
            Err(_) => {
                warn!("an after-action panicked, passing its input response through unchanged");
                response
            }
        };
    }
    response
}

/// Resolves the handler for this exchange along with its route's declared
/// path-parameter names, so the caller can scope the request's
/// path-parameter view to exactly what the matched route's own pattern
/// declares.
async fn resolve_handler<'a>(
    engine: &'a Engine,
    route_idx: Option<usize>,
    method: &Method,
    content_type: Option<&Mime>,
    accept_header: Option<&str>,
) -> Result<(HandlerFn, Vec<String>), EngineError> {
    let route_idx = route_idx.ok_or(EngineError::Routing(RoutingError::NoRouteFound))?;
    let routes = engine.routes.read().await;
    let route = routes.route(route_idx);
    let entry = negotiate::resolve(route, method, content_type, accept_header)
        .map_err(|err| EngineError::Routing(convert_resolve_error(err, method)))?;
    Ok((entry.handler.clone(), route.param_names.clone()))
}

fn convert_resolve_error(err: ResolveError, method: &Method) -> RoutingError {
    match err {
        ResolveError::MethodNotAllowed { allowed } => RoutingError::MethodNotAllowed { method: method.clone(), allowed },
        ResolveError::NoHandlerResolvedNotAcceptable => RoutingError::NoHandlerResolvedNotAcceptable,
        ResolveError::NoHandlerResolvedUnsupportedMedia => RoutingError::NoHandlerResolvedUnsupportedMedia,
        ResolveError::AmbiguousHandler => RoutingError::AmbiguousHandler,
    }
}

/// Runs a synchronous executing entity, catching a panic and folding it
/// into the same `EngineError` path a thrown error takes.
fn call_entity<F, T>(f: F) -> Result<T, EngineError>
where
    F: FnOnce() -> T,
{
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).map_err(|_| EngineError::Application(Box::new(EntityPanicked)))
}

/// The `async` counterpart of [`call_entity`], for before-actions and
/// handlers whose `call` is itself `async` (they may `.await` an
/// [`ExchangeCx`] write mid-call).
async fn call_entity_async<Fut, T>(fut: Fut) -> Result<T, EngineError>
where
    Fut: std::future::Future<Output = T>,
{
    std::panic::AssertUnwindSafe(fut).catch_unwind().await.map_err(|_| EngineError::Application(Box::new(EntityPanicked)))
}

async fn respond_to_error<S: AsyncRead + AsyncWrite + Unpin + Send>(
    engine: &Engine,
    channel: &mut Channel<S>,
    error: EngineError,
    request: Option<&Request>,
    version: Option<Version>,
) -> bool {
    let response = engine.exceptions.read().await.run(&error, request);
    match write_final(engine, channel, &response, version, request.map(Request::method)).await {
        Ok(must_close) => must_close,
        Err(()) => true,
    }
}

async fn write_final<S: AsyncRead + AsyncWrite + Unpin + Send>(
    engine: &Engine,
    channel: &mut Channel<S>,
    response: &Response,
    version: Option<Version>,
    method: Option<&Method>,
) -> Result<bool, ()> {
    let deadline = Instant::now() + engine.config().timeout_response;
    match writer::write_response(channel, response, version, method, deadline, engine.events()).await {
        Ok(outcome) => Ok(outcome.must_close),
        Err(err) => {
            warn!(error = %err, "failed writing a response, closing the connection");
            Err(())
        }
    }
}

/// Folds the request side of connection-close handling into the response
/// (the connection must close if either side asked for it), since
/// `writer.rs` only ever inspects the response's own headers.
fn propagate_close(response: Response, request_wants_close: bool) -> Response {
    if request_wants_close && !response.must_close() {
        response.to_builder().header("Connection", "close").build()
    } else {
        response
    }
}

fn expects_continue(headers: &Headers) -> bool {
    headers.get("expect").is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
}

fn map_head_parse_error(err: HeadParseError) -> EngineError {
    match err {
        HeadParseError::RequestLineParse => EngineError::Parse(ParseError::RequestLineParse),
        HeadParseError::HeaderParse => EngineError::Parse(ParseError::HeaderParse),
        HeadParseError::RequestHeadSizeExceeded => EngineError::SizeLimit(SizeLimitError::RequestHeadSizeExceeded),
        HeadParseError::HeaderCountSizeExceeded => EngineError::SizeLimit(SizeLimitError::HeaderCountSizeExceeded),
        HeadParseError::HttpVersionRejected => EngineError::Version(VersionError::HttpVersionRejected),
        HeadParseError::HttpVersionNotSupported => EngineError::Version(VersionError::HttpVersionNotSupported),
    }
}

/// Classifies a request's body framing from its headers. A request
/// carrying both `Transfer-Encoding` and `Content-Length` is rejected
/// outright rather than picking one, since the ambiguity is exactly the
/// request-smuggling shape HTTP/1.1 forbids.
fn body_kind_from_headers(headers: &Headers) -> Result<BodyKind, EngineError> {
    let has_chunked = headers.contains("transfer-encoding");
    let has_length = headers.contains("content-length");
    if has_chunked && has_length {
        return Err(EngineError::Parse(ParseError::HeaderParse));
    }
    if has_chunked {
        let te = headers.get("transfer-encoding").unwrap_or_default();
        return if te.trim().eq_ignore_ascii_case("chunked") {
            Ok(BodyKind::Chunked)
        } else {
            Err(EngineError::Parse(ParseError::HeaderParse))
        };
    }
    if has_length {
        let raw = headers.get("content-length").unwrap_or_default();
        let n: u64 = raw.trim().parse().map_err(|_| EngineError::Parse(ParseError::HeaderParse))?;
        return Ok(BodyKind::Fixed(n));
    }
    Ok(BodyKind::Fixed(0))
}

fn parse_content_type(headers: &Headers) -> Result<Option<Mime>, EngineError> {
    match headers.get("content-type") {
        None => Ok(None),
        Some(raw) => Mime::from_str(raw).map(Some).map_err(|_| EngineError::Parse(ParseError::BadMediaType(raw.to_string()))),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn wrap_engine(config: Config) -> Arc<Engine> {
        Arc::new(Engine::new(config))
    }

    async fn roundtrip(engine: Arc<Engine>, request: &[u8]) -> Vec<u8> {
        let (mut client, server) = duplex(65536);
        client.write_all(request).await.unwrap();
        let done = tokio::spawn(async move {
            drive_connection(engine, server).await;
        });
        client.shutdown().await.unwrap();
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut out)).await.unwrap().unwrap();
        done.await.unwrap();
        out
    }

    #[tokio::test]
    async fn hello_world_end_to_end() {
        let engine = wrap_engine(Config::default());
        let route = engine.add_route("/hello").await.unwrap();
        engine
            .add_handler(route, Method::get(), MediaSpec::NothingAndAll, Mime::from_str("text/plain").unwrap(), crate::route::sync_handler(|_: &Request| {
                Response::builder(StatusCode::OK).text("Hello World!").build()
            }))
            .await
            .unwrap();

        let out = roundtrip(engine, b"GET /hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.ends_with("Hello World!"));
    }

    struct DeclaredNameHandler;

    #[async_trait::async_trait]
    impl crate::route::Handler for DeclaredNameHandler {
        async fn call(&self, request: &Request, declared: &[String], _cx: &mut ExchangeCx<'_>) -> Option<Response> {
            let name = request.path_params(declared).decoded("name").unwrap().to_string();
            Some(Response::builder(StatusCode::OK).text(format!("Hello {name}!")).build())
        }
    }

    #[tokio::test]
    async fn path_param_is_visible_to_the_handler() {
        let engine = wrap_engine(Config::default());
        let route = engine.add_route("/hello/:name").await.unwrap();
        engine
            .add_handler(
                route,
                Method::get(),
                MediaSpec::NothingAndAll,
                Mime::from_str("text/plain").unwrap(),
                Arc::new(DeclaredNameHandler),
            )
            .await
            .unwrap();

        let out = roundtrip(engine, b"GET /hello/John HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Content-Length: 11"));
        assert!(text.ends_with("Hello John!"));
    }

    #[tokio::test]
    async fn missing_route_becomes_404() {
        let engine = wrap_engine(Config::default());
        let out = roundtrip(engine, b"GET /nope HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn method_not_allowed_reports_the_allow_header() {
        let engine = wrap_engine(Config::default());
        let route = engine.add_route("/only-get").await.unwrap();
        engine
            .add_handler(route, Method::get(), MediaSpec::NothingAndAll, Mime::from_str("text/plain").unwrap(), crate::route::sync_handler(|_: &Request| {
                Response::builder(StatusCode::OK).build()
            }))
            .await
            .unwrap();

        let out = roundtrip(engine, b"POST /only-get HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 405"));
        assert!(text.contains("Allow: GET"));
    }

    #[tokio::test]
    async fn before_action_short_circuit_still_runs_after_actions() {
        let engine = wrap_engine(Config::default());
        let route = engine.add_route("/guarded").await.unwrap();
        engine
            .add_handler(route, Method::get(), MediaSpec::NothingAndAll, Mime::from_str("text/plain").unwrap(), crate::route::sync_handler(|_: &Request| {
                Response::builder(StatusCode::OK).text("should not run").build()
            }))
            .await
            .unwrap();
        engine
            .before("/guarded", crate::action::sync_before_action(|_: &Request| BeforeOutcome::Respond(Response::builder(StatusCode::new(403)).build())))
            .await
            .unwrap();
        let after_ran = Arc::new(AtomicUsize::new(0));
        let after_ran2 = after_ran.clone();
        engine
            .after(
                "/guarded",
                Arc::new(move |_request: &Request, response: Response| {
                    after_ran2.fetch_add(1, Ordering::SeqCst);
                    response
                }),
            )
            .await
            .unwrap();

        let out = roundtrip(engine, b"GET /guarded HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 403"));
        assert_eq!(after_ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_panicking_handler_becomes_a_500_instead_of_dropping_the_connection() {
        let engine = wrap_engine(Config::default());
        let route = engine.add_route("/boom").await.unwrap();
        engine
            .add_handler(route, Method::get(), MediaSpec::NothingAndAll, Mime::from_str("text/plain").unwrap(), crate::route::sync_handler(|_: &Request| {
                panic!("handler exploded")
            }))
            .await
            .unwrap();

        let out = roundtrip(engine, b"GET /boom HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 500"));
    }

    struct InterimCountdownHandler;

    #[async_trait::async_trait]
    impl crate::route::Handler for InterimCountdownHandler {
        async fn call(&self, _request: &Request, _declared: &[String], cx: &mut ExchangeCx<'_>) -> Option<Response> {
            for seconds_left in [3, 2, 1] {
                let interim = Response::builder(StatusCode::PROCESSING)
                    .header("Time-Left", format!("{seconds_left} second(s)"))
                    .build();
                cx.send_interim(interim).await.unwrap();
            }
            Some(Response::builder(StatusCode::NO_CONTENT).build())
        }
    }

    #[tokio::test]
    async fn a_handler_can_write_several_interim_responses_before_its_final_one() {
        let engine = wrap_engine(Config::default());
        let route = engine.add_route("/countdown").await.unwrap();
        engine
            .add_handler(
                route,
                Method::get(),
                MediaSpec::NothingAndAll,
                Mime::from_str("text/plain").unwrap(),
                Arc::new(InterimCountdownHandler),
            )
            .await
            .unwrap();

        let out = roundtrip(engine, b"GET /countdown HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
        let text = String::from_utf8(out).unwrap();
        let status_lines: Vec<&str> = text.lines().filter(|l| l.starts_with("HTTP/1.1")).collect();
        assert_eq!(status_lines, vec!["HTTP/1.1 102 Processing", "HTTP/1.1 102 Processing", "HTTP/1.1 102 Processing", "HTTP/1.1 204 No Content"]);
        assert!(text.contains("Time-Left: 3 second(s)"));
        assert!(text.contains("Time-Left: 1 second(s)"));
    }

    #[tokio::test]
    async fn a_connection_close_request_forces_the_response_to_carry_it_too() {
        let engine = wrap_engine(Config::default());
        let route = engine.add_route("/x").await.unwrap();
        engine
            .add_handler(route, Method::get(), MediaSpec::NothingAndAll, Mime::from_str("text/plain").unwrap(), crate::route::sync_handler(|_: &Request| {
                Response::builder(StatusCode::OK).text("ok").build()
            }))
            .await
            .unwrap();

        let out = roundtrip(engine, b"GET /x HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Connection: close"));
    }
}
