//! Error taxonomy. Every variant that has a well-defined HTTP mapping
//! implements [`AdvisoryResponse`]; the base exception handler
//! (`exception.rs`) is the only place that falls back to 500 for the rest.

use thiserror::Error;

use crate::method::Method;
use crate::status::StatusCode;

/// Capability implemented by error kinds that know their own HTTP
/// translation.
pub trait AdvisoryResponse {
    /// The status this error should be reported as, if any.
    fn advisory_status(&self) -> Option<StatusCode>;
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed request line")]
    RequestLineParse,
    #[error("malformed header line")]
    HeaderParse,
    #[error("malformed media type: {0}")]
    BadMediaType(String),
}

impl AdvisoryResponse for ParseError {
    fn advisory_status(&self) -> Option<StatusCode> {
        Some(StatusCode::BAD_REQUEST)
    }
}

#[derive(Debug, Error)]
pub enum SizeLimitError {
    #[error("request line exceeded the configured maximum length")]
    RequestLineSizeExceeded,
    #[error("total request head size exceeded the configured maximum")]
    RequestHeadSizeExceeded,
    #[error("number of header lines exceeded the configured maximum")]
    HeaderCountSizeExceeded,
    #[error("response trailers exceeded the configured maximum size")]
    ResponseTrailersSizeExceeded,
}

impl AdvisoryResponse for SizeLimitError {
    fn advisory_status(&self) -> Option<StatusCode> {
        match self {
            SizeLimitError::HeaderCountSizeExceeded | SizeLimitError::ResponseTrailersSizeExceeded => {
                Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE)
            }
            SizeLimitError::RequestLineSizeExceeded | SizeLimitError::RequestHeadSizeExceeded => {
                Some(StatusCode::PAYLOAD_TOO_LARGE)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("no route matches this path")]
    NoRouteFound,
    #[error("route matched but no handler accepts method {method}")]
    MethodNotAllowed { method: Method, allowed: Vec<Method> },
    #[error("more than one handler tied for this request")]
    AmbiguousHandler,
    #[error("no handler could produce a representation the client accepts")]
    NoHandlerResolvedNotAcceptable,
    #[error("no handler consumes the request's content type")]
    NoHandlerResolvedUnsupportedMedia,
    #[error("a route with an equivalent identity already exists")]
    RouteCollisionEquivalentRoute,
    #[error("hierarchical position occupied with non-compatible type")]
    RouteCollisionPositionOccupied,
    #[error("an identical (pattern, action) pair is already registered")]
    ActionNonUnique,
    #[error("a handler with an equal (method, consumes, produces) tuple already exists")]
    HandlerCollision,
}

impl AdvisoryResponse for RoutingError {
    fn advisory_status(&self) -> Option<StatusCode> {
        match self {
            RoutingError::NoRouteFound => Some(StatusCode::NOT_FOUND),
            RoutingError::MethodNotAllowed { .. } => Some(StatusCode::METHOD_NOT_ALLOWED),
            RoutingError::AmbiguousHandler => Some(StatusCode::INTERNAL_SERVER_ERROR),
            RoutingError::NoHandlerResolvedNotAcceptable => Some(StatusCode::NOT_ACCEPTABLE),
            RoutingError::NoHandlerResolvedUnsupportedMedia => Some(StatusCode::UNSUPPORTED_MEDIA_TYPE),
            RoutingError::RouteCollisionEquivalentRoute
            | RoutingError::RouteCollisionPositionOccupied
            | RoutingError::ActionNonUnique
            | RoutingError::HandlerCollision => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("the client's HTTP version is too old to be served")]
    HttpVersionRejected,
    #[error("the client's HTTP version is newer than this engine supports")]
    HttpVersionNotSupported,
}

impl AdvisoryResponse for VersionError {
    fn advisory_status(&self) -> Option<StatusCode> {
        match self {
            VersionError::HttpVersionRejected => Some(StatusCode::UPGRADE_REQUIRED),
            VersionError::HttpVersionNotSupported => Some(StatusCode::HTTP_VERSION_NOT_SUPPORTED),
        }
    }
}

#[derive(Debug, Error)]
pub enum TimeoutError {
    #[error("timed out reading the request head")]
    RequestHeadTimeout,
    #[error("timed out reading the request body")]
    RequestBodyTimeout,
    #[error("timed out writing the response")]
    ResponseTimeout,
    #[error("connection sat idle past the configured idle timeout")]
    IdleConnectionTimeout,
    #[error("timed out waiting to acquire a path lock")]
    FileLockTimeout,
}

impl AdvisoryResponse for TimeoutError {
    fn advisory_status(&self) -> Option<StatusCode> {
        Some(StatusCode::REQUEST_TIMEOUT)
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("the underlying stream ended before the expected data arrived")]
    UnexpectedEndOfStream,
    #[error("the connection closed mid-exchange")]
    ConnectionClosedMidExchange,
}

impl AdvisoryResponse for StreamError {
    fn advisory_status(&self) -> Option<StatusCode> {
        match self {
            StreamError::UnexpectedEndOfStream => Some(StatusCode::BAD_REQUEST),
            // no response is sent; the exchange is simply abandoned.
            StreamError::ConnectionClosedMidExchange => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResponseError {
    #[error("a 1XX response, or a 204/304 response, may not carry a body")]
    IllegalResponseBody,
    #[error("the response was rejected: {0}")]
    ResponseRejected(ResponseRejectedReason),
    #[error("attempted to upgrade a held read lock to a write lock")]
    IllegalLockUpgrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseRejectedReason {
    /// The client's negotiated version does not support 1XX responses.
    ClientProtocolDoesNotSupport,
    /// The request never finished parsing, so no version is known.
    ClientProtocolUnknownButNeeded,
}

impl std::fmt::Display for ResponseRejectedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseRejectedReason::ClientProtocolDoesNotSupport => {
                write!(f, "client protocol does not support interim responses")
            }
            ResponseRejectedReason::ClientProtocolUnknownButNeeded => {
                write!(f, "client protocol is unknown but an interim response was requested")
            }
        }
    }
}

impl AdvisoryResponse for ResponseError {
    fn advisory_status(&self) -> Option<StatusCode> {
        // Logged internal 500 unless the response was already partly sent,
        // which exception.rs checks separately before consulting this.
        match self {
            ResponseError::IllegalLockUpgrade => None,
            _ => Some(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

/// Top-level error any executing entity (before-action, handler,
/// after-action, exception handler) may raise. Wraps each taxonomy group
/// as a variant.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    SizeLimit(#[from] SizeLimitError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error(transparent)]
    PathParam(#[from] crate::path_params::PathParamError),
    #[error(transparent)]
    Body(#[from] crate::body::BodyError),
    #[error(transparent)]
    Channel(#[from] crate::channel::ChannelError),
    /// An application-defined error with no built-in HTTP mapping; the base
    /// exception handler reports it as 500.
    #[error("{0}")]
    Application(Box<dyn std::error::Error + Send + Sync>),
}

impl AdvisoryResponse for EngineError {
    fn advisory_status(&self) -> Option<StatusCode> {
        match self {
            EngineError::Parse(e) => e.advisory_status(),
            EngineError::SizeLimit(e) => e.advisory_status(),
            EngineError::Routing(e) => e.advisory_status(),
            EngineError::Version(e) => e.advisory_status(),
            EngineError::Timeout(e) => e.advisory_status(),
            EngineError::Stream(e) => e.advisory_status(),
            EngineError::Response(e) => e.advisory_status(),
            EngineError::PathParam(_) => Some(StatusCode::INTERNAL_SERVER_ERROR),
            EngineError::Body(_) => Some(StatusCode::BAD_REQUEST),
            EngineError::Channel(_) => None,
            EngineError::Application(_) => None,
        }
    }
}
