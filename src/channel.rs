//! Byte channel and buffered reader: scoped ownership of the underlying
//! socket, generic over any `tokio::io::{AsyncRead, AsyncWrite}` transport
//! (a real `TcpStream` in production, an in-memory `tokio::io::DuplexStream`
//! half in tests).

use std::io;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("the deadline for this operation elapsed")]
    DeadlineElapsed,
    #[error("the peer closed the connection before the expected data arrived")]
    UnexpectedEndOfStream,
    #[error("the data received exceeds the configured limit")]
    LimitExceeded,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// An absolute point in time by which an operation must complete. Every
/// Every `Channel` operation takes one explicitly.
pub type Deadline = Instant;

/// Scoped owner of one connection's socket, plus the ring of bytes already
/// read off the wire but not yet consumed by a higher layer (the head
/// parser, the body reader).
pub struct Channel<S> {
    socket: S,
    buf: BytesMut,
    input_open: bool,
    output_open: bool,
    closed: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Channel<S> {
    pub fn new(socket: S) -> Channel<S> {
        Channel { socket, buf: BytesMut::new(), input_open: true, output_open: true, closed: false }
    }

    pub fn input_open(&self) -> bool {
        self.input_open
    }
    pub fn output_open(&self) -> bool {
        self.output_open
    }
    pub fn closed(&self) -> bool {
        self.closed
    }

    /// Reads more bytes into the internal ring, returning how many arrived
    /// (`0` means end-of-stream).
    async fn fill(&mut self, deadline: Deadline) -> Result<usize, ChannelError> {
        let mut tmp = [0u8; 8192];
        let n = tokio::time::timeout_at(deadline, self.socket.read(&mut tmp))
            .await
            .map_err(|_| ChannelError::DeadlineElapsed)??;
        if n == 0 {
            self.input_open = false;
        } else {
            self.buf.extend_from_slice(&tmp[..n]);
        }
        Ok(n)
    }

    /// Ensures at least one byte is buffered, performing one read if
    /// necessary, without consuming it. Returns `false` on a clean
    /// end-of-stream with nothing buffered — used to distinguish a
    /// genuinely idle connection from one already mid-head — idle time
    /// between exchanges is bounded separately from the time to read one
    /// head.
    pub async fn wait_for_data(&mut self, deadline: Deadline) -> Result<bool, ChannelError> {
        if !self.buf.is_empty() {
            return Ok(true);
        }
        if !self.input_open {
            return Ok(false);
        }
        self.fill(deadline).await?;
        Ok(!self.buf.is_empty())
    }

    /// Reads until `\r\n\r\n` is seen, bounded by `max_size` total bytes
    /// buffered before the terminator is found. Returns the head bytes
    /// (including the terminator) and removes them from the ring.
    pub async fn read_until_crlfcrlf(&mut self, max_size: usize, deadline: Deadline) -> Result<BytesMut, ChannelError> {
        loop {
            if let Some(pos) = find_subslice(&self.buf, b"\r\n\r\n") {
                let head = self.buf.split_to(pos + 4);
                return Ok(head);
            }
            if self.buf.len() > max_size {
                return Err(ChannelError::LimitExceeded);
            }
            if !self.input_open {
                return Err(ChannelError::UnexpectedEndOfStream);
            }
            self.fill(deadline).await?;
        }
    }

    /// Reads exactly `n` bytes, bounded by `deadline`.
    pub async fn read_exact_bounded(&mut self, n: usize, deadline: Deadline) -> Result<bytes::Bytes, ChannelError> {
        while self.buf.len() < n {
            if !self.input_open {
                return Err(ChannelError::UnexpectedEndOfStream);
            }
            self.fill(deadline).await?;
        }
        Ok(self.buf.split_to(n).freeze())
    }

    /// Reads up to `max` bytes (at least 1 unless end-of-stream), without
    /// requiring a fixed count — used for EOF-terminated bodies read
    /// progressively.
    pub async fn read_some_bounded(&mut self, max: usize, deadline: Deadline) -> Result<bytes::Bytes, ChannelError> {
        if !self.buf.is_empty() {
            let take = self.buf.len().min(max);
            return Ok(self.buf.split_to(take).freeze());
        }
        if !self.input_open {
            return Ok(bytes::Bytes::new());
        }
        self.fill(deadline).await?;
        let take = self.buf.len().min(max);
        Ok(self.buf.split_to(take).freeze())
    }

    /// Reads until end-of-stream, bounded by `max_len` total bytes.
    pub async fn read_to_eof(&mut self, max_len: usize, deadline: Deadline) -> Result<bytes::Bytes, ChannelError> {
        while self.input_open {
            if self.buf.len() > max_len {
                return Err(ChannelError::LimitExceeded);
            }
            self.fill(deadline).await?;
        }
        if self.buf.len() > max_len {
            return Err(ChannelError::LimitExceeded);
        }
        Ok(self.buf.split_to(self.buf.len()).freeze())
    }

    /// Reads one CRLF-terminated line (used for chunk-size lines), without
    /// the trailing CRLF.
    pub async fn read_line(&mut self, deadline: Deadline) -> Result<String, ChannelError> {
        loop {
            if let Some(pos) = find_subslice(&self.buf, b"\r\n") {
                let line = self.buf.split_to(pos + 2);
                let text = String::from_utf8_lossy(&line[..line.len() - 2]).into_owned();
                return Ok(text);
            }
            if !self.input_open {
                return Err(ChannelError::UnexpectedEndOfStream);
            }
            self.fill(deadline).await?;
        }
    }

    pub async fn write_all(&mut self, bytes: &[u8], deadline: Deadline) -> Result<(), ChannelError> {
        if !self.output_open {
            return Err(ChannelError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "output already shut down")));
        }
        tokio::time::timeout_at(deadline, self.socket.write_all(bytes))
            .await
            .map_err(|_| ChannelError::DeadlineElapsed)??;
        Ok(())
    }

    /// Idempotent; never surfaces "already closed" errors to the caller,
    /// logging anything else at warning level.
    pub async fn shutdown_output(&mut self) {
        if !self.output_open {
            return;
        }
        self.output_open = false;
        if let Err(err) = self.socket.shutdown().await {
            if !is_benign_shutdown_error(&err) {
                tracing::warn!(error = %err, "error shutting down channel output");
            }
        }
    }

    /// Half-closing the read side has no portable async equivalent for an
    /// arbitrary `AsyncRead + AsyncWrite`; this marks input as logically
    /// closed so further reads fail fast instead of blocking. The server
    /// refines this to a real `shutdown(Read)` for a `TcpStream`
    /// (see `server.rs`).
    pub fn shutdown_input(&mut self) {
        self.input_open = false;
    }

    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.shutdown_output().await;
        self.shutdown_input();
        self.closed = true;
    }
}

fn is_benign_shutdown_error(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
