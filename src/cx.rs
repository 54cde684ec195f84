//! Scoped "current channel" capability handed to before-actions and the
//! request handler so either may write interim 1XX responses directly on
//! the channel before the chain produces its final response.
//!
//! `ExchangeCx` erases the connection's concrete transport type behind
//! [`InterimSink`] so `Handler`/`BeforeAction` stay plain trait objects,
//! not generic over the socket type the way `Channel<S>` is.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use crate::channel::Channel;
use crate::error::{EngineError, ResponseError, ResponseRejectedReason};
use crate::events::Events;
use crate::method::Method;
use crate::response::Response;
use crate::version::Version;
use crate::writer::{self, WriteError};

#[async_trait]
pub trait InterimSink: Send {
    async fn write_interim(&mut self, response: &Response) -> Result<(), EngineError>;
    async fn write_final(&mut self, response: &Response, method: Option<&Method>) -> Result<bool, EngineError>;
}

/// The production [`InterimSink`]: writes straight through a live
/// [`Channel`]. Each write gets its own fresh deadline computed from
/// `response_timeout`, since an exchange may write several interim
/// responses spaced out over time.
pub struct ChannelSink<'a, S> {
    channel: &'a mut Channel<S>,
    version: Option<Version>,
    response_timeout: Duration,
    events: &'a Events,
}

impl<'a, S> ChannelSink<'a, S> {
    pub fn new(channel: &'a mut Channel<S>, version: Option<Version>, response_timeout: Duration, events: &'a Events) -> ChannelSink<'a, S> {
        ChannelSink { channel, version, response_timeout, events }
    }
}

#[async_trait]
impl<'a, S: AsyncRead + AsyncWrite + Unpin + Send> InterimSink for ChannelSink<'a, S> {
    async fn write_interim(&mut self, response: &Response) -> Result<(), EngineError> {
        let deadline = Instant::now() + self.response_timeout;
        writer::write_response(self.channel, response, self.version, None, deadline, self.events)
            .await
            .map(|_| ())
            .map_err(map_write_error)
    }

    async fn write_final(&mut self, response: &Response, method: Option<&Method>) -> Result<bool, EngineError> {
        let deadline = Instant::now() + self.response_timeout;
        writer::write_response(self.channel, response, self.version, method, deadline, self.events)
            .await
            .map(|outcome| outcome.must_close)
            .map_err(map_write_error)
    }
}

fn map_write_error(err: WriteError) -> EngineError {
    match err {
        WriteError::IllegalResponseBody => EngineError::Response(ResponseError::IllegalResponseBody),
        WriteError::ClientProtocolDoesNotSupport => {
            EngineError::Response(ResponseError::ResponseRejected(ResponseRejectedReason::ClientProtocolDoesNotSupport))
        }
        WriteError::ClientProtocolUnknownButNeeded => {
            EngineError::Response(ResponseError::ResponseRejected(ResponseRejectedReason::ClientProtocolUnknownButNeeded))
        }
        WriteError::Header(e) => EngineError::Application(Box::new(e)),
        WriteError::Channel(e) => EngineError::Channel(e),
    }
}

/// Handed by reference to every entity in the `Running` chain: before-
/// actions and the handler both receive the request plus this write
/// capability. The short-circuit half of that capability is
/// `BeforeOutcome`; this is the channel-write half.
pub struct ExchangeCx<'a> {
    sink: &'a mut dyn InterimSink,
    sent_continue: bool,
    written_final: Option<bool>,
}

impl<'a> ExchangeCx<'a> {
    pub fn new(sink: &'a mut dyn InterimSink) -> ExchangeCx<'a> {
        ExchangeCx { sink, sent_continue: false, written_final: None }
    }

    /// Writes an interim response now. Fails with
    /// [`EngineError::Response`] if `response` is not actually a 1XX
    /// response, or if the client's negotiated version doesn't support
    /// interim responses.
    pub async fn send_interim(&mut self, response: Response) -> Result<(), EngineError> {
        if !response.is_interim() {
            return Err(EngineError::Response(ResponseError::IllegalResponseBody));
        }
        if response.status() == crate::status::StatusCode::CONTINUE {
            self.sent_continue = true;
        }
        self.sink.write_interim(&response).await
    }

    /// Writes a final response directly and marks the exchange as
    /// already-answered: the handler may do this instead of returning a
    /// `Response` value, writing on the channel and returning `None` as an
    /// explicit already-written sentinel. After-actions do not run in this
    /// case, since there is no returned `Response` for them to observe.
    pub async fn send_final(&mut self, response: Response, method: Option<&Method>) -> Result<(), EngineError> {
        let must_close = self.sink.write_final(&response, method).await?;
        self.written_final = Some(must_close);
        Ok(())
    }

    /// Whether a 100 Continue already went out on this exchange, so the
    /// engine's own auto-continue logic for `Expect: 100-continue` can
    /// skip sending a duplicate.
    pub fn continue_already_sent(&self) -> bool {
        self.sent_continue
    }

    /// Takes the `must_close` outcome of a handler-initiated
    /// [`ExchangeCx::send_final`], if one happened.
    pub(crate) fn take_final_write(&mut self) -> Option<bool> {
        self.written_final.take()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::status::StatusCode;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<u16>>);

    #[async_trait]
    impl InterimSink for RecordingSink {
        async fn write_interim(&mut self, response: &Response) -> Result<(), EngineError> {
            self.0.lock().unwrap().push(response.status().as_u16());
            Ok(())
        }

        async fn write_final(&mut self, response: &Response, _method: Option<&Method>) -> Result<bool, EngineError> {
            self.0.lock().unwrap().push(response.status().as_u16());
            Ok(false)
        }
    }

    #[tokio::test]
    async fn send_interim_records_the_status_and_marks_continue() {
        let mut sink = RecordingSink(Mutex::new(Vec::new()));
        let mut cx = ExchangeCx::new(&mut sink);
        cx.send_interim(Response::builder(StatusCode::CONTINUE).build()).await.unwrap();
        assert!(cx.continue_already_sent());
        assert_eq!(sink.0.lock().unwrap().as_slice(), &[100]);
    }

    #[tokio::test]
    async fn send_interim_rejects_a_final_response() {
        let mut sink = RecordingSink(Mutex::new(Vec::new()));
        let mut cx = ExchangeCx::new(&mut sink);
        let err = cx.send_interim(Response::builder(StatusCode::OK).build()).await.unwrap_err();
        assert!(matches!(err, EngineError::Response(ResponseError::IllegalResponseBody)));
    }
}
