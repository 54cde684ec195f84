//! Head parser. Uses `httparse` as the tokenizer, then layers the size
//! limits and version/value classification this engine requires beyond
//! what `httparse` itself enforces.

use thiserror::Error;

use crate::headers::Headers;
use crate::method::Method;
use crate::version::Version;

#[derive(Debug, Error)]
pub enum HeadParseError {
    #[error("malformed request line")]
    RequestLineParse,
    #[error("malformed header line")]
    HeaderParse,
    #[error("total request head size exceeded the configured maximum")]
    RequestHeadSizeExceeded,
    #[error("number of header lines exceeded the configured maximum")]
    HeaderCountSizeExceeded,
    #[error("the client's HTTP version is too old to be served")]
    HttpVersionRejected,
    #[error("the client's HTTP version is newer than this engine supports")]
    HttpVersionNotSupported,
}

pub struct ParsedHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: Headers,
}

/// Parses one complete head (`request-line CRLF (header CRLF)* CRLF`,
/// already delimited by [`crate::channel::Channel::read_until_crlfcrlf`])
/// subject to `max_head_size` (bounds the request line together with
/// every header line) and `max_header_count`, an internal
/// tokenizer-capacity cap on the number of header lines.
pub fn parse_head(buf: &[u8], max_head_size: usize, max_header_count: usize) -> Result<ParsedHead, HeadParseError> {
    if buf.len() > max_head_size {
        return Err(HeadParseError::RequestHeadSizeExceeded);
    }

    let mut header_storage = vec![httparse::EMPTY_HEADER; max_header_count.max(1)];
    let mut req = httparse::Request::new(&mut header_storage);
    let status = req.parse(buf).map_err(|err| match err {
        httparse::Error::TooManyHeaders => HeadParseError::HeaderCountSizeExceeded,
        httparse::Error::Version => HeadParseError::HttpVersionRejected,
        _ => HeadParseError::RequestLineParse,
    })?;
    if status.is_partial() {
        return Err(HeadParseError::RequestLineParse);
    }

    let method = Method::parse(req.method.ok_or(HeadParseError::RequestLineParse)?).map_err(|_| HeadParseError::RequestLineParse)?;
    let target = req.path.ok_or(HeadParseError::RequestLineParse)?.to_string();
    let version = parse_version(req.version.ok_or(HeadParseError::RequestLineParse)?)?;

    let mut headers = Headers::new();
    for header in req.headers.iter() {
        if header.name.is_empty() {
            break;
        }
        let value = std::str::from_utf8(header.value).map_err(|_| HeadParseError::HeaderParse)?;
        headers.append(header.name, fold_obsolete_line_folding(value));
    }

    Ok(ParsedHead { method, target, version, headers })
}

/// `httparse` exposes only the minor version for the `HTTP/1.x` family it
/// supports (0 or 1); anything it accepts is therefore major 1. We still
/// classify explicitly so a future tokenizer swap keeps the same behavior.
fn parse_version(minor: u8) -> Result<Version, HeadParseError> {
    match minor {
        0 => Ok(Version::HTTP_10),
        1 => Ok(Version::HTTP_11),
        _ => Err(HeadParseError::HttpVersionNotSupported),
    }
}

/// Folds a single obsolete line-fold artifact (a run of whitespace) into a
/// single space. `httparse` already rejects bare CR/LF inside a header
/// value, so by the time a value reaches here any internal folding has
/// already been collapsed by the wire format into literal spaces/tabs;
/// this normalizes runs of such whitespace to one space.
fn fold_obsolete_line_folding(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_was_space = false;
    for c in value.trim().chars() {
        if c == ' ' || c == '\t' {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_a_simple_get_request() {
        let head = b"GET /hello HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let parsed = parse_head(head, 8192, 100).unwrap();
        assert_eq!(parsed.method.as_str(), "GET");
        assert_eq!(parsed.target, "/hello");
        assert_eq!(parsed.version, Version::HTTP_11);
        assert_eq!(parsed.headers.get("host"), Some("example.com"));
    }

    #[test]
    fn collapses_internal_whitespace_runs() {
        let head = b"GET / HTTP/1.1\r\nX-Multi:   a    b\r\n\r\n";
        let parsed = parse_head(head, 8192, 100).unwrap();
        assert_eq!(parsed.headers.get("x-multi"), Some("a b"));
    }

    #[test]
    fn rejects_a_head_over_the_size_limit() {
        let head = b"GET / HTTP/1.1\r\n\r\n";
        let err = parse_head(head, 4, 100).unwrap_err();
        assert!(matches!(err, HeadParseError::RequestHeadSizeExceeded));
    }

    #[test]
    fn rejects_too_many_header_lines() {
        let mut head = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..5 {
            head.extend_from_slice(format!("H{i}: v\r\n").as_bytes());
        }
        head.extend_from_slice(b"\r\n");
        let err = parse_head(&head, 8192, 3).unwrap_err();
        assert!(matches!(err, HeadParseError::HeaderCountSizeExceeded));
    }
}
