//! Exception chain: an ordered chain of user-registered handlers,
//! terminated by a base handler that never throws and always produces a
//! response.

use std::sync::Arc;

use tracing::warn;

use crate::config::Config;
use crate::error::{AdvisoryResponse, EngineError};
use crate::method::Method;
use crate::request::Request;
use crate::response::{Response, ResponseBuilder};
use crate::status::StatusCode;

/// What an exception handler may do with the chain behind it.
pub enum Chain<'a> {
    Remaining(&'a [Arc<dyn ExceptionHandler>], &'a BaseExceptionHandler),
}

impl<'a> Chain<'a> {
    /// Delegates to the next handler in the chain (or the base handler if
    /// none remain).
    pub fn proceed(&self, error: &EngineError, request: Option<&Request>) -> Response {
        match self {
            Chain::Remaining([], base) => base.handle(error, request),
            Chain::Remaining([next, rest @ ..], base) => next.handle(error, request, Chain::Remaining(rest, base)),
        }
    }
}

/// A user-registered exception handler. Must not throw; a handler that
/// panics is caught and reported as an internal 500, with a warning
/// logged, exactly like the base handler's own fallback.
pub trait ExceptionHandler: Send + Sync {
    fn handle(&self, error: &EngineError, request: Option<&Request>, chain: Chain<'_>) -> Response;
}

impl<F: Fn(&EngineError, Option<&Request>, Chain<'_>) -> Response + Send + Sync> ExceptionHandler for F {
    fn handle(&self, error: &EngineError, request: Option<&Request>, chain: Chain<'_>) -> Response {
        self(error, request, chain)
    }
}

/// The terminal, always-present handler. Consults the error's advisory
/// response if it has one, implements `implement_missing_options`, and
/// otherwise falls back to 500.
pub struct BaseExceptionHandler {
    config: Arc<Config>,
}

impl BaseExceptionHandler {
    pub fn new(config: Arc<Config>) -> BaseExceptionHandler {
        BaseExceptionHandler { config }
    }

    pub fn handle(&self, error: &EngineError, request: Option<&Request>) -> Response {
        if self.config.implement_missing_options {
            if let (EngineError::Routing(crate::error::RoutingError::MethodNotAllowed { allowed, .. }), Some(req)) = (error, request) {
                if req.method() == &Method::options() {
                    let allow = allowed_header_value(allowed, true);
                    return Response::builder(StatusCode::NO_CONTENT).header("Allow", allow).build();
                }
            }
        }

        if let crate::error::EngineError::Routing(crate::error::RoutingError::MethodNotAllowed { allowed, .. }) = error {
            let allow = allowed_header_value(allowed, false);
            return Response::builder(StatusCode::METHOD_NOT_ALLOWED).header("Allow", allow).build();
        }

        match error.advisory_status() {
            Some(status) if (300..600).contains(&status.as_u16()) => Response::builder(status).build(),
            Some(status) => {
                warn!(code = status.as_u16(), "advisory response outside 3XX-5XX, substituting 418");
                Response::builder(StatusCode::IM_A_TEAPOT).build()
            }
            None => {
                warn!(error = %error, "unmapped error reached the base exception handler");
                Response::builder(StatusCode::INTERNAL_SERVER_ERROR).build()
            }
        }
    }
}

fn allowed_header_value(allowed: &[Method], include_options: bool) -> String {
    let mut names: Vec<String> = allowed.iter().map(|m| m.to_string()).collect();
    if include_options && !names.iter().any(|n| n == "OPTIONS") {
        names.push("OPTIONS".to_string());
    }
    names.join(", ")
}

/// The registered chain plus the base handler and the per-exchange
/// recovery-attempt counter: a handler that keeps re-throwing is bounded
/// by `max_error_recovery_attempts` instead of looping forever.
pub struct ExceptionChain {
    handlers: Vec<Arc<dyn ExceptionHandler>>,
    base: BaseExceptionHandler,
    config: Arc<Config>,
}

impl ExceptionChain {
    pub fn new(config: Arc<Config>) -> ExceptionChain {
        ExceptionChain { handlers: Vec::new(), base: BaseExceptionHandler::new(config.clone()), config }
    }

    pub fn register(&mut self, handler: Arc<dyn ExceptionHandler>) {
        self.handlers.push(handler);
    }

    /// Runs the chain for `error`. `request` is `None` if the failure
    /// occurred before head parsing finished.
    pub fn run(&self, error: &EngineError, request: Option<&Request>) -> Response {
        let mut attempts = 0u32;
        let max = self.config.max_error_recovery_attempts;
        self.run_with_recovery(error, request, &mut attempts, max)
    }

    fn run_with_recovery(&self, error: &EngineError, request: Option<&Request>, attempts: &mut u32, max: u32) -> Response {
        if *attempts >= max {
            warn!("exceeded max error recovery attempts, returning 500 directly");
            return ResponseBuilder::new(StatusCode::INTERNAL_SERVER_ERROR).build();
        }
        *attempts += 1;
        let chain = Chain::Remaining(&self.handlers, &self.base);
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| chain.proceed(error, request))) {
            Ok(response) => response,
            Err(_) => {
                warn!("an exception handler panicked, returning 500 directly");
                ResponseBuilder::new(StatusCode::INTERNAL_SERVER_ERROR).build()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::RoutingError;

    #[test]
    fn base_handler_maps_an_advisory_status() {
        let chain = ExceptionChain::new(Arc::new(Config::default()));
        let err = EngineError::Routing(RoutingError::NoRouteFound);
        let response = chain.run(&err, None);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unmapped_error_falls_back_to_500() {
        let chain = ExceptionChain::new(Arc::new(Config::default()));
        let err = EngineError::Routing(RoutingError::RouteCollisionEquivalentRoute);
        let response = chain.run(&err, None);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn method_not_allowed_on_options_becomes_204_when_configured() {
        let chain = ExceptionChain::new(Arc::new(Config::default()));
        let request = Request::new(
            Method::options(),
            crate::request::Target::parse("/x"),
            crate::version::Version::HTTP_11,
            crate::headers::Headers::new(),
            crate::body::Body::empty(),
            crate::path_params::PathParams::new(),
        );
        let err = EngineError::Routing(RoutingError::MethodNotAllowed { method: Method::options(), allowed: vec![Method::get()] });
        let response = chain.run(&err, Some(&request));
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers().get("allow"), Some("GET, OPTIONS"));
    }

    #[test]
    fn registered_handler_can_short_circuit_before_the_base_handler() {
        let mut chain = ExceptionChain::new(Arc::new(Config::default()));
        chain.register(Arc::new(|_: &EngineError, _: Option<&Request>, _: Chain<'_>| {
            Response::builder(StatusCode::new(503)).build()
        }));
        let err = EngineError::Routing(RoutingError::NoRouteFound);
        let response = chain.run(&err, None);
        assert_eq!(response.status(), StatusCode::new(503));
    }
}
