//! The immutable, value-like `Response` and its builder.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::headers::Headers;
use crate::status::StatusCode;

/// A boxed stream of response body chunks, for a body whose total length
/// isn't known until it has been fully produced. Yielding `Err` aborts the
/// write mid-body.
pub type ResponseBodyStream = BoxStream<'static, Result<Bytes, ResponseBodyError>>;

#[derive(Debug, Error)]
pub enum ResponseBodyError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

enum Cursor {
    Buffered(std::vec::IntoIter<Bytes>),
    Streamed(ResponseBodyStream),
}

/// A response body: either fully materialized up front (length always
/// known), or a lazily pulled stream of chunks (length known only once the
/// stream is exhausted, which the writer never waits for — it frames the
/// body as chunked instead).
///
/// Cloning shares the same underlying cursor rather than copying pending
/// chunks. That's sound here: a `Response` is pulled from by the writer at
/// most once, and every place that clones one (`to_builder`, an
/// after-action receiving the response by value) does so before that pull
/// starts, so there is never more than one active reader.
#[derive(Clone)]
pub struct ResponseBody {
    cursor: Arc<AsyncMutex<Cursor>>,
    known_length: Option<u64>,
}

impl ResponseBody {
    pub fn empty() -> ResponseBody {
        ResponseBody::buffered(Vec::new())
    }

    pub fn buffered(chunks: Vec<Bytes>) -> ResponseBody {
        let known_length = Some(chunks.iter().map(|c| c.len() as u64).sum());
        ResponseBody { cursor: Arc::new(AsyncMutex::new(Cursor::Buffered(chunks.into_iter()))), known_length }
    }

    /// A body produced lazily, chunk by chunk, with no length known up
    /// front.
    pub fn streamed(stream: ResponseBodyStream) -> ResponseBody {
        ResponseBody { cursor: Arc::new(AsyncMutex::new(Cursor::Streamed(stream))), known_length: None }
    }

    /// The body's length, if it was fully materialized up front.
    pub fn known_length(&self) -> Option<u64> {
        self.known_length
    }

    pub fn is_empty(&self) -> bool {
        self.known_length == Some(0)
    }

    /// Pulls the next chunk, or `None` once the body is exhausted.
    pub async fn next_chunk(&self) -> Result<Option<Bytes>, ResponseBodyError> {
        let mut guard = self.cursor.lock().await;
        match &mut *guard {
            Cursor::Buffered(iter) => Ok(iter.next()),
            Cursor::Streamed(stream) => stream.next().await.transpose(),
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known_length {
            Some(n) => write!(f, "ResponseBody::Buffered({n} bytes)"),
            None => write!(f, "ResponseBody::Streamed"),
        }
    }
}

impl PartialEq for ResponseBody {
    /// Two bodies are equal only if they share the same cursor — a
    /// streamed body has no stable content to compare by value, so this
    /// falls back to identity, which still makes `to_builder().build()`
    /// compare equal to its source since it clones the same `Arc`.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cursor, &other.cursor)
    }
}

/// One outbound response. Values are never mutated in place; a
/// [`ResponseBuilder`] produces new instances.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    reason: Option<String>,
    headers: Headers,
    body: ResponseBody,
    trailers: Option<Headers>,
}

impl Response {
    pub fn builder(status: StatusCode) -> ResponseBuilder {
        ResponseBuilder::new(status)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn body_len(&self) -> Option<u64> {
        self.body.known_length()
    }

    pub fn trailers(&self) -> Option<&Headers> {
        self.trailers.as_ref()
    }

    pub fn is_interim(&self) -> bool {
        self.status.is_informational()
    }

    pub fn is_final(&self) -> bool {
        !self.is_interim()
    }

    /// True if a `Connection: close` token is present on this response.
    pub fn must_close(&self) -> bool {
        self.headers.has_connection_close()
    }

    pub fn to_builder(&self) -> ResponseBuilder {
        ResponseBuilder {
            status: self.status,
            reason: self.reason.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            trailers: self.trailers.clone(),
        }
    }
}

impl PartialEq for Response {
    fn eq(&self, other: &Self) -> bool {
        self.status == other.status
            && self.reason == other.reason
            && self.headers == other.headers
            && self.body == other.body
            && self.trailers == other.trailers
    }
}

/// Builds a [`Response`]. Every setter consumes and returns `self` so
/// calls chain.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    status: StatusCode,
    reason: Option<String>,
    headers: Headers,
    body: ResponseBody,
    trailers: Option<Headers>,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> ResponseBuilder {
        ResponseBuilder { status, reason: None, headers: Headers::new(), body: ResponseBody::empty(), trailers: None }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, bytes: impl Into<Bytes>) -> Self {
        self.body = ResponseBody::buffered(vec![bytes.into()]);
        self
    }

    pub fn body_chunks(mut self, chunks: Vec<Bytes>) -> Self {
        self.body = ResponseBody::buffered(chunks);
        self
    }

    /// Sets a body that is produced lazily and whose length is not known
    /// up front; the writer frames it with `Transfer-Encoding: chunked`
    /// (or, for an HTTP/1.0 client, by closing the connection at the end).
    pub fn body_stream(mut self, stream: ResponseBodyStream) -> Self {
        self.body = ResponseBody::streamed(stream);
        self
    }

    pub fn trailers(mut self, trailers: Headers) -> Self {
        self.trailers = Some(trailers);
        self
    }

    /// Convenience for a plain-text body.
    pub fn text(self, body: impl Into<String>) -> Self {
        let body: String = body.into();
        self.header("Content-Type", "text/plain; charset=utf-8").body(Bytes::from(body.into_bytes()))
    }

    pub fn build(self) -> Response {
        Response { status: self.status, reason: self.reason, headers: self.headers, body: self.body, trailers: self.trailers }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_tripping_through_the_builder_preserves_equality() {
        let original = Response::builder(StatusCode::OK).header("X-A", "1").text("hi").build();
        let rebuilt = original.to_builder().build();
        assert_eq!(original, rebuilt);
    }

    #[test]
    fn interim_vs_final_classification() {
        assert!(Response::builder(StatusCode::new(102)).build().is_interim());
        assert!(Response::builder(StatusCode::NO_CONTENT).build().is_final());
    }

    #[test]
    fn must_close_reflects_connection_header() {
        let r = Response::builder(StatusCode::OK).header("Connection", "close").build();
        assert!(r.must_close());
    }

    #[test]
    fn a_buffered_body_has_a_known_length() {
        let r = Response::builder(StatusCode::OK).body(Bytes::from_static(b"abc")).build();
        assert_eq!(r.body_len(), Some(3));
    }

    #[tokio::test]
    async fn a_streamed_body_has_no_known_length_until_exhausted() {
        let stream = futures::stream::iter(vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))]).boxed();
        let r = Response::builder(StatusCode::OK).body_stream(stream).build();
        assert_eq!(r.body_len(), None);
        assert_eq!(r.body().next_chunk().await.unwrap(), Some(Bytes::from_static(b"ab")));
        assert_eq!(r.body().next_chunk().await.unwrap(), Some(Bytes::from_static(b"cd")));
        assert_eq!(r.body().next_chunk().await.unwrap(), None);
    }
}
