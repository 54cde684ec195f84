//! Request body representation: a lazy, at-most-once-streamable sequence
//! of chunks with a framing kind (`Fixed(u64) | Chunked | Eof`). Every
//! read takes the caller's request-body-timeout deadline and threads it
//! down to each `Channel` operation.

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

use crate::channel::{Channel, Deadline};

/// The body kind of an HTTP message, as determined from its framing
/// headers. Messages without a body have the value `Fixed(0)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BodyKind {
    Fixed(u64),
    Chunked,
    Eof,
}

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("request body was already consumed")]
    AlreadyConsumed,
    #[error("request body was already cached and cannot be streamed again")]
    AlreadyCached,
    #[error(transparent)]
    Channel(#[from] crate::channel::ChannelError),
    #[error("invalid chunk framing in request body")]
    InvalidChunkFraming,
}

enum Source {
    /// Not yet read at all.
    Fresh { kind: BodyKind },
    /// Fully buffered into memory, readable any number of times.
    Cached(Bytes),
    /// Consumed once via the streaming API; a second read fails.
    Consumed,
}

/// A lazy, at-most-once-streamable sequence of body bytes with an optional
/// known length (`BodyKind::Fixed`/`Eof` carry a length or not;
/// `BodyKind::Chunked` never does up front).
pub struct Body {
    kind: BodyKind,
    source: Mutex<Source>,
}

impl Body {
    pub fn empty() -> Body {
        Body { kind: BodyKind::Fixed(0), source: Mutex::new(Source::Cached(Bytes::new())) }
    }

    pub fn new(kind: BodyKind) -> Body {
        Body { kind, source: Mutex::new(Source::Fresh { kind }) }
    }

    pub fn kind(&self) -> BodyKind {
        self.kind
    }

    pub fn known_length(&self) -> Option<u64> {
        match self.kind {
            BodyKind::Fixed(n) => Some(n),
            _ => None,
        }
    }

    /// Reads the whole body into memory, up to `max_len` bytes, caching it
    /// so it can be read again. Fails if the body was already streamed via
    /// [`Body::read_once`]. `deadline` is the caller's `RequestBodyTimeout`
    /// deadline; it bounds every underlying channel read, not just the
    /// first.
    pub async fn read_to_end<S: AsyncRead + AsyncWrite + Unpin + Send>(
        &self,
        channel: &mut Channel<S>,
        max_len: usize,
        deadline: Deadline,
    ) -> Result<Bytes, BodyError> {
        let mut guard = self.source.lock().await;
        match &*guard {
            Source::Cached(bytes) => Ok(bytes.clone()),
            Source::Consumed => Err(BodyError::AlreadyConsumed),
            Source::Fresh { kind } => {
                let bytes = read_all(channel, *kind, max_len, deadline).await?;
                *guard = Source::Cached(bytes.clone());
                Ok(bytes)
            }
        }
    }

    /// Streams the body once, chunk by chunk. A second call, or a call
    /// after [`Body::read_to_end`] has been used, fails: the body is
    /// readable exactly once unless explicitly cached.
    pub async fn read_once<S: AsyncRead + AsyncWrite + Unpin + Send>(
        &self,
        channel: &mut Channel<S>,
        max_chunk: usize,
        deadline: Deadline,
    ) -> Result<Vec<Bytes>, BodyError> {
        let mut guard = self.source.lock().await;
        match &*guard {
            Source::Cached(_) => Err(BodyError::AlreadyCached),
            Source::Consumed => Err(BodyError::AlreadyConsumed),
            Source::Fresh { kind } => {
                let kind = *kind;
                let chunks = read_chunks(channel, kind, max_chunk, deadline).await?;
                *guard = Source::Consumed;
                Ok(chunks)
            }
        }
    }
}

async fn read_all<S: AsyncRead + AsyncWrite + Unpin + Send>(
    channel: &mut Channel<S>,
    kind: BodyKind,
    max_len: usize,
    deadline: Deadline,
) -> Result<Bytes, BodyError> {
    match kind {
        BodyKind::Fixed(0) => Ok(Bytes::new()),
        BodyKind::Fixed(n) => {
            let n = n as usize;
            if n > max_len {
                return Err(BodyError::InvalidChunkFraming);
            }
            Ok(channel.read_exact_bounded(n, deadline).await?)
        }
        BodyKind::Eof => channel.read_to_eof(max_len, deadline).await.map_err(BodyError::from),
        BodyKind::Chunked => read_chunked(channel, max_len, deadline).await,
    }
}

async fn read_chunks<S: AsyncRead + AsyncWrite + Unpin + Send>(
    channel: &mut Channel<S>,
    kind: BodyKind,
    max_chunk: usize,
    deadline: Deadline,
) -> Result<Vec<Bytes>, BodyError> {
    match kind {
        BodyKind::Fixed(0) => Ok(Vec::new()),
        BodyKind::Fixed(n) => {
            let mut remaining = n as usize;
            let mut out = Vec::new();
            while remaining > 0 {
                let take = remaining.min(max_chunk.max(1));
                let chunk = channel.read_exact_bounded(take, deadline).await?;
                remaining -= chunk.len();
                out.push(chunk);
            }
            Ok(out)
        }
        BodyKind::Eof => {
            let mut out = Vec::new();
            loop {
                let chunk = channel.read_some_bounded(max_chunk.max(1), deadline).await?;
                if chunk.is_empty() {
                    break;
                }
                out.push(chunk);
            }
            Ok(out)
        }
        BodyKind::Chunked => {
            let whole = read_chunked(channel, usize::MAX, deadline).await?;
            Ok(vec![whole])
        }
    }
}

async fn read_chunked<S: AsyncRead + AsyncWrite + Unpin + Send>(
    channel: &mut Channel<S>,
    max_len: usize,
    deadline: Deadline,
) -> Result<Bytes, BodyError> {
    let mut out = Vec::new();
    loop {
        let size_line = channel.read_line(deadline).await?;
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16).map_err(|_| BodyError::InvalidChunkFraming)?;
        if size == 0 {
            // trailers would be read here; this engine does not expose
            // request trailers, only response trailers.
            let _ = channel.read_line(deadline).await?;
            break;
        }
        if out.len() + size > max_len {
            return Err(BodyError::InvalidChunkFraming);
        }
        let chunk = channel.read_exact_bounded(size, deadline).await?;
        out.extend_from_slice(&chunk);
        let crlf = channel.read_exact_bounded(2, deadline).await?;
        if &crlf[..] != b"\r\n" {
            return Err(BodyError::InvalidChunkFraming);
        }
    }
    Ok(Bytes::from(out))
}
