//! Response writer: framing-header derivation, 1XX/final sequencing, and
//! `ResponseSent` emission on top of the low-level `message.rs`
//! byte-sequencer.

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use crate::channel::Channel;
use crate::events::{Events, ResponseSent};
use crate::message::{BodyPolicy, HeaderError, Message, MessageState};
use crate::method::Method;
use crate::response::Response;
use crate::version::Version;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("a 1XX or 204 response may not carry a body")]
    IllegalResponseBody,
    #[error("the client's protocol does not support interim responses")]
    ClientProtocolDoesNotSupport,
    #[error("an interim response was requested but the client's protocol is unknown")]
    ClientProtocolUnknownButNeeded,
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Channel(#[from] crate::channel::ChannelError),
    #[error(transparent)]
    Body(#[from] crate::response::ResponseBodyError),
}

/// The outcome of writing one response: whether the exchange must now
/// close, and how many bytes went out, for the `ResponseSent` observation.
pub struct WriteOutcome {
    pub must_close: bool,
    pub bytes_written: u64,
}

/// The effective body disposition a response will get once written,
/// mirroring exactly the forcing rules `Message::status` applies
/// internally (1XX/204 deny a body outright; HEAD or 304 keep the framing
/// headers but suppress body bytes).
fn effective_policy(code: u16, is_head: bool) -> BodyPolicy {
    if (100..200).contains(&code) || code == 204 {
        BodyPolicy::Denied
    } else if is_head || code == 304 {
        BodyPolicy::Ignored
    } else {
        BodyPolicy::Normal
    }
}

/// Serializes `response` to `channel`, deriving its framing headers and
/// emitting a [`ResponseSent`] event. `known_version` is the negotiated
/// client version, or `None` if the request head never finished parsing
/// (in which case only a final, non-interim response may be written).
pub async fn write_response<S: AsyncRead + AsyncWrite + Unpin + Send>(
    channel: &mut Channel<S>,
    response: &Response,
    known_version: Option<Version>,
    request_method: Option<&Method>,
    deadline: Instant,
    events: &Events,
) -> Result<WriteOutcome, WriteError> {
    let start = Instant::now();
    let code = response.status().as_u16();
    let is_head = request_method == Some(&Method::head());
    let policy = effective_policy(code, is_head);

    if response.is_interim() {
        match known_version {
            None => return Err(WriteError::ClientProtocolUnknownButNeeded),
            Some(v) if !v.is_http_11_or_newer() => return Err(WriteError::ClientProtocolDoesNotSupport),
            Some(_) => {}
        }
    }
    if policy == BodyPolicy::Denied && !response.body().is_empty() {
        return Err(WriteError::IllegalResponseBody);
    }

    let version = known_version.unwrap_or(Version::HTTP_11);

    // Content-Length/Transfer-Encoding are always derived here, never
    // taken from the caller's headers — strip a stray Content-Length off a
    // 204/304 before anything else.
    let mut headers = response.headers().clone();
    headers.remove("content-length");
    headers.remove("transfer-encoding");

    // A body with trailers can only be framed as chunked, even if it's
    // otherwise fully buffered; a streamed body has no known length at all.
    let known_length = if response.trailers().is_some() { None } else { response.body_len() };

    let close = response.must_close() || (version == Version::HTTP_10 && known_length.is_none());

    let mut buf = BytesMut::new();
    let mut message = Message::new(&mut buf, MessageState::new(version, policy, close));
    message.status(code, response.reason().unwrap_or_else(|| response.status().canonical_reason()));
    message.add_headers(&headers)?;

    if policy != BodyPolicy::Denied {
        match known_length {
            Some(n) => message.add_length(n)?,
            None if version.is_http_11_or_newer() => message.add_chunked()?,
            None => {} // falls through to Message's close-delimited state
        }
    }

    let needs_body = message.done_headers()?;
    if needs_body {
        while let Some(chunk) = response.body().next_chunk().await? {
            message.write_body(&chunk);
        }
    }
    message.done(response.trailers());

    channel.write_all(&buf, deadline).await?;
    let bytes_written = buf.len() as u64;

    let stop = Instant::now();
    events.emit(&ResponseSent { start, stop, bytes: bytes_written });

    Ok(WriteOutcome { must_close: close, bytes_written })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::headers::Headers;
    use crate::status::StatusCode;
    use bytes::Bytes;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::io::duplex;

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(1)
    }

    #[tokio::test]
    async fn hello_world_scenario_matches_the_documented_wire_bytes() {
        let (mut client, server) = duplex(4096);
        let mut chan = Channel::new(server);
        let response = Response::builder(StatusCode::OK).text("Hello World!").build();
        let events = Events::new();
        write_response(&mut chan, &response, Some(Version::HTTP_11), Some(&Method::get()), deadline(), &events).await.unwrap();
        drop(chan);
        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut out).await.unwrap();
        assert_eq!(
            &out[..],
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 12\r\n\r\nHello World!"
        );
    }

    #[tokio::test]
    async fn http_10_with_trailers_forces_connection_close_and_streams_to_eof() {
        let (mut client, server) = duplex(4096);
        let mut chan = Channel::new(server);
        let mut trailers = Headers::new();
        trailers.append("X-Checksum", "abc");
        let response = Response::builder(StatusCode::OK).body(bytes::Bytes::from_static(b"abc")).trailers(trailers).build();
        let events = Events::new();
        let outcome =
            write_response(&mut chan, &response, Some(Version::HTTP_10), Some(&Method::get()), deadline(), &events).await.unwrap();
        assert!(outcome.must_close);
        drop(chan);
        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.0 200 OK"));
        assert!(text.contains("Connection: close"));
        assert!(!text.contains("Transfer-Encoding"));
        assert!(text.ends_with("abc"));
    }

    #[tokio::test]
    async fn http_11_with_trailers_uses_chunked_encoding() {
        let (mut client, server) = duplex(4096);
        let mut chan = Channel::new(server);
        let mut trailers = Headers::new();
        trailers.append("X-Checksum", "abc");
        let response = Response::builder(StatusCode::OK).body(bytes::Bytes::from_static(b"abc")).trailers(trailers).build();
        let events = Events::new();
        write_response(&mut chan, &response, Some(Version::HTTP_11), Some(&Method::get()), deadline(), &events).await.unwrap();
        drop(chan);
        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Transfer-Encoding: chunked"));
        assert!(text.contains("X-Checksum: abc"));
    }

    #[tokio::test]
    async fn a_streamed_body_of_unknown_length_uses_chunked_encoding() {
        let (mut client, server) = duplex(4096);
        let mut chan = Channel::new(server);
        let stream = futures::stream::iter(vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))]).boxed();
        let response = Response::builder(StatusCode::OK).body_stream(stream).build();
        let events = Events::new();
        write_response(&mut chan, &response, Some(Version::HTTP_11), Some(&Method::get()), deadline(), &events).await.unwrap();
        drop(chan);
        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Transfer-Encoding: chunked"));
        assert!(text.contains("2\r\nab\r\n2\r\ncd\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn an_interim_response_is_rejected_for_http_10() {
        let (_client, server) = duplex(4096);
        let mut chan = Channel::new(server);
        let response = Response::builder(StatusCode::new(102)).build();
        let events = Events::new();
        let err = write_response(&mut chan, &response, Some(Version::HTTP_10), None, deadline(), &events).await.unwrap_err();
        assert!(matches!(err, WriteError::ClientProtocolDoesNotSupport));
    }

    #[tokio::test]
    async fn an_interim_response_is_rejected_when_version_is_unknown() {
        let (_client, server) = duplex(4096);
        let mut chan = Channel::new(server);
        let response = Response::builder(StatusCode::new(102)).build();
        let events = Events::new();
        let err = write_response(&mut chan, &response, None, None, deadline(), &events).await.unwrap_err();
        assert!(matches!(err, WriteError::ClientProtocolUnknownButNeeded));
    }

    #[tokio::test]
    async fn head_request_suppresses_body_bytes_but_keeps_framing_headers() {
        let (mut client, server) = duplex(4096);
        let mut chan = Channel::new(server);
        let response = Response::builder(StatusCode::OK).text("Hello World!").build();
        let events = Events::new();
        write_response(&mut chan, &response, Some(Version::HTTP_11), Some(&Method::head()), deadline(), &events).await.unwrap();
        drop(chan);
        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Content-Length: 12"));
        assert!(!text.contains("Hello World!"));
    }

    #[tokio::test]
    async fn a_204_drops_a_stray_content_length_header() {
        let (mut client, server) = duplex(4096);
        let mut chan = Channel::new(server);
        let response = Response::builder(StatusCode::NO_CONTENT).header("Content-Length", "5").build();
        let events = Events::new();
        write_response(&mut chan, &response, Some(Version::HTTP_11), Some(&Method::get()), deadline(), &events).await.unwrap();
        drop(chan);
        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("Content-Length"));
    }
}
