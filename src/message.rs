//! Low-level response byte-sequencer.
//!
//! One `Message` encodes exactly one on-wire message into a `BytesMut`
//! buffer, enforcing that headers precede the body and the body precede
//! `done()`, with support for 1XX interim responses and trailers.
//! `writer.rs` layers framing-header derivation and sequencing across
//! interim/final responses on top of this.

use bytes::BytesMut;
use thiserror::Error;

use crate::headers::Headers;
use crate::version::Version;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Content-Length is added twice")]
    DuplicateContentLength,
    #[error("Transfer-Encoding is added twice")]
    DuplicateTransferEncoding,
    #[error("transfer encoding added when Content-Length is already specified")]
    TransferEncodingAfterContentLength,
    #[error("Content-Length added after Transfer-Encoding")]
    ContentLengthAfterTransferEncoding,
    #[error("neither Content-Length nor Transfer-Encoding is present in the headers")]
    CantDetermineBodySize,
    #[error("Content-Length and Transfer-Encoding must be set using the specialized methods")]
    BodyLengthHeader,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BodyPolicy {
    /// A body is permitted and, if a length is known, expected.
    Normal,
    /// A body would normally be present but must not be written on the
    /// wire (HEAD requests, 304 responses): framing headers are kept.
    Ignored,
    /// A body is forbidden outright (1XX, 204 responses).
    Denied,
}

#[derive(Debug)]
pub enum MessageState {
    /// Nothing has been written yet.
    Start { version: Version, body: BodyPolicy, close: bool },
    /// Status line is already in the buffer.
    Headers { body: BodyPolicy, chunked: bool, close: bool, content_length: Option<u64>, has_trailers: bool },
    ZeroBodyMessage,
    IgnoredBody,
    FixedSizeBody(u64),
    ChunkedBody,
    /// No `Content-Length` or `Transfer-Encoding` is present; the end of
    /// the body is the connection closing (the HTTP/1.0 "stream to
    /// end-of-output" framing). Only reachable when `close` was already
    /// `true`, since otherwise a client would have no way to find the end
    /// of the message.
    CloseDelimitedBody,
    Done,
}

impl MessageState {
    pub fn new(version: Version, body: BodyPolicy, close: bool) -> MessageState {
        MessageState::Start { version, body, close }
    }

    pub fn is_started(&self) -> bool {
        !matches!(self, MessageState::Start { .. })
    }
}

/// Pairs a `MessageState` with the output buffer it writes into.
pub struct Message<'a>(&'a mut BytesMut, MessageState);

impl<'a> Message<'a> {
    pub fn new(out_buf: &'a mut BytesMut, state: MessageState) -> Message<'a> {
        Message(out_buf, state)
    }

    /// Writes the status line, transitioning `Start -> Headers`.
    ///
    /// A 1XX or 204 status forces [`BodyPolicy::Denied`]; a 304 over a
    /// previously-`Normal` body forces [`BodyPolicy::Ignored`] (headers
    /// describing a body are kept, but no bytes follow).
    ///
    /// # Panics
    /// Panics if called outside `Start` state — an executing entity
    /// calling this twice on one `Message` is a programming error.
    pub fn status(&mut self, code: u16, reason: &str) {
        use BodyPolicy::*;
        match self.1 {
            MessageState::Start { version, mut body, close } => {
                use std::io::Write;
                write!(self.0, "{} {} {}\r\n", version, code, reason).unwrap();
                if (100..200).contains(&code) || code == 204 {
                    body = Denied;
                } else if body == Normal && code == 304 {
                    body = Ignored;
                }
                self.1 = MessageState::Headers { body, content_length: None, chunked: false, close, has_trailers: false };
            }
            ref state => panic!("called status() on a message in state {:?}", state),
        }
    }

    fn write_header_line(&mut self, name: &str, value: &[u8]) {
        use std::io::Write;
        self.0.write_all(name.as_bytes()).unwrap();
        self.0.write_all(b": ").unwrap();
        self.0.write_all(value).unwrap();
        self.0.write_all(b"\r\n").unwrap();
    }

    /// Appends an ordinary header. `Content-Length` and `Transfer-Encoding`
    /// must go through [`Message::add_length`]/[`Message::add_chunked`]
    /// instead, since those two headers are load-bearing for framing
    /// safety.
    pub fn add_header(&mut self, name: &str, value: &[u8]) -> Result<(), HeaderError> {
        if crate::headers::is_content_length(name) || crate::headers::is_transfer_encoding(name) {
            return Err(HeaderError::BodyLengthHeader);
        }
        match self.1 {
            MessageState::Headers { .. } => {
                self.write_header_line(name, value);
                Ok(())
            }
            ref state => panic!("called add_header() on a message in state {:?}", state),
        }
    }

    /// Writes every header in `headers`, in order.
    pub fn add_headers(&mut self, headers: &Headers) -> Result<(), HeaderError> {
        for (name, value) in headers.iter() {
            self.add_header(name.as_str(), value.as_bytes())?;
        }
        Ok(())
    }

    pub fn add_length(&mut self, n: u64) -> Result<(), HeaderError> {
        match self.1 {
            MessageState::Headers { content_length: Some(_), .. } => return Err(HeaderError::DuplicateContentLength),
            MessageState::Headers { chunked: true, .. } => return Err(HeaderError::ContentLengthAfterTransferEncoding),
            MessageState::Headers { ref mut content_length, .. } => *content_length = Some(n),
            ref state => panic!("called add_length() on a message in state {:?}", state),
        }
        self.write_header_line("Content-Length", n.to_string().as_bytes());
        Ok(())
    }

    pub fn add_chunked(&mut self) -> Result<(), HeaderError> {
        match self.1 {
            MessageState::Headers { content_length: Some(_), .. } => return Err(HeaderError::TransferEncodingAfterContentLength),
            MessageState::Headers { chunked: true, .. } => return Err(HeaderError::DuplicateTransferEncoding),
            MessageState::Headers { ref mut chunked, .. } => *chunked = true,
            ref state => panic!("called add_chunked() on a message in state {:?}", state),
        }
        self.write_header_line("Transfer-Encoding", b"chunked");
        Ok(())
    }

    /// Marks that a `Trailer` header has been declared, so `done()` knows
    /// to look for a trailer write for a chunked body.
    pub fn announce_trailers(&mut self, names: &str) -> Result<(), HeaderError> {
        self.add_header("Trailer", names.as_bytes())?;
        if let MessageState::Headers { ref mut has_trailers, .. } = self.1 {
            *has_trailers = true;
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.1.is_started()
    }

    /// Finalizes headers, writing `Connection: close` if needed, and
    /// returns whether a body is expected to follow.
    ///
    /// # Panics
    /// Panics outside `Headers` state.
    pub fn done_headers(&mut self) -> Result<bool, HeaderError> {
        use BodyPolicy::*;
        if let MessageState::Headers { close: true, .. } = self.1 {
            self.add_header("Connection", b"close").unwrap();
        }
        let result = match self.1 {
            MessageState::Headers { body: Ignored, .. } => {
                self.1 = MessageState::IgnoredBody;
                Ok(false)
            }
            MessageState::Headers { body: Denied, .. } => {
                self.1 = MessageState::ZeroBodyMessage;
                Ok(false)
            }
            MessageState::Headers { body: Normal, content_length: Some(cl), chunked: false, .. } => {
                self.1 = MessageState::FixedSizeBody(cl);
                Ok(true)
            }
            MessageState::Headers { body: Normal, content_length: None, chunked: true, .. } => {
                self.1 = MessageState::ChunkedBody;
                Ok(true)
            }
            MessageState::Headers { content_length: Some(_), chunked: true, .. } => unreachable!(),
            MessageState::Headers { body: Normal, content_length: None, chunked: false, close: true, .. } => {
                self.1 = MessageState::CloseDelimitedBody;
                Ok(true)
            }
            MessageState::Headers { body: Normal, content_length: None, chunked: false, close: false, .. } => {
                Err(HeaderError::CantDetermineBodySize)
            }
            ref state => panic!("called done_headers() on a message in state {:?}", state),
        };
        use std::io::Write;
        self.0.write_all(b"\r\n").unwrap();
        result
    }

    /// Writes one body chunk, prefixed by a chunk-size line if the body
    /// is chunked.
    ///
    /// # Panics
    /// Panics if called in a state without a known body-length contract,
    /// or if `data` would overrun a fixed-size body.
    pub fn write_body(&mut self, data: &[u8]) {
        use std::io::Write;
        match self.1 {
            MessageState::ZeroBodyMessage => {
                if !data.is_empty() {
                    panic!("non-zero data length for a response whose body is denied");
                }
            }
            MessageState::FixedSizeBody(ref mut remaining) => {
                if data.len() as u64 > *remaining {
                    panic!("fixed size response overrun: {} bytes left but got {}", remaining, data.len());
                }
                self.0.write_all(data).unwrap();
                *remaining -= data.len() as u64;
            }
            MessageState::ChunkedBody => {
                write!(self.0, "{:x}\r\n", data.len()).unwrap();
                self.0.write_all(data).unwrap();
                self.0.write_all(b"\r\n").unwrap();
            }
            MessageState::CloseDelimitedBody => {
                self.0.write_all(data).unwrap();
            }
            ref state => panic!("called write_body() on a message in state {:?}", state),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.1, MessageState::Done)
    }

    /// Finalizes the message: writes the chunked terminator (with
    /// trailers, if any) or asserts a fixed body was fully written.
    /// Idempotent once `Done`.
    ///
    /// # Panics
    /// Panics if a fixed-size body was not fully written.
    pub fn done(&mut self, trailers: Option<&Headers>) {
        use std::io::Write;
        match self.1 {
            MessageState::ChunkedBody => {
                self.0.write_all(b"0\r\n").unwrap();
                if let Some(trailers) = trailers {
                    for (name, value) in trailers.iter() {
                        self.write_header_line(name.as_str(), value.as_bytes());
                    }
                }
                self.0.write_all(b"\r\n").unwrap();
                self.1 = MessageState::Done;
            }
            MessageState::FixedSizeBody(0) => self.1 = MessageState::Done,
            MessageState::FixedSizeBody(remaining) => {
                panic!("done() called with {} body bytes still unwritten", remaining)
            }
            MessageState::ZeroBodyMessage => self.1 = MessageState::Done,
            MessageState::IgnoredBody => self.1 = MessageState::Done,
            MessageState::CloseDelimitedBody => self.1 = MessageState::Done,
            MessageState::Done => {}
            ref state => panic!("called done() on a message in state {:?}", state),
        }
    }

    pub fn into_state(self) -> MessageState {
        self.1
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn response(version: Version, close: bool, fun: impl FnOnce(&mut Message)) -> BytesMut {
        let mut buf = BytesMut::new();
        let mut msg = Message::new(&mut buf, MessageState::new(version, BodyPolicy::Normal, close));
        fun(&mut msg);
        buf
    }

    #[test]
    fn minimal_response_10() {
        let buf = response(Version::HTTP_10, false, |msg| {
            msg.status(200, "OK");
            msg.add_length(0).unwrap();
            msg.done_headers().unwrap();
            msg.done(None);
        });
        assert_eq!(&buf[..], b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n");
    }

    #[test]
    fn close_response_11() {
        let buf = response(Version::HTTP_11, true, |msg| {
            msg.status(200, "OK");
            msg.add_length(0).unwrap();
            msg.done_headers().unwrap();
            msg.done(None);
        });
        assert_eq!(&buf[..], b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    }

    #[test]
    fn a_204_forces_the_body_to_be_denied() {
        let buf = response(Version::HTTP_11, false, |msg| {
            msg.status(204, "No Content");
            msg.done_headers().unwrap();
            msg.done(None);
        });
        assert_eq!(&buf[..], b"HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[test]
    fn chunked_body_with_trailers() {
        let mut trailers = Headers::new();
        trailers.append("X-Checksum", "abc");
        let buf = response(Version::HTTP_11, false, |msg| {
            msg.status(200, "OK");
            msg.add_chunked().unwrap();
            msg.done_headers().unwrap();
            msg.write_body(b"hi");
            msg.done(Some(&trailers));
        });
        assert_eq!(
            &buf[..],
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nhi\r\n0\r\nX-Checksum: abc\r\n\r\n"
        );
    }

    #[test]
    fn a_close_delimited_body_has_no_framing_header() {
        let buf = response(Version::HTTP_10, true, |msg| {
            msg.status(200, "OK");
            msg.done_headers().unwrap();
            msg.write_body(b"abc");
            msg.done(None);
        });
        assert_eq!(&buf[..], b"HTTP/1.0 200 OK\r\nConnection: close\r\n\r\nabc");
    }

    #[test]
    fn a_1xx_response_cannot_carry_a_body() {
        let buf = response(Version::HTTP_11, false, |msg| {
            msg.status(102, "Processing");
            let has_body = msg.done_headers().unwrap();
            assert!(!has_body);
            msg.done(None);
        });
        assert_eq!(&buf[..], b"HTTP/1.1 102 Processing\r\n\r\n");
    }
}
