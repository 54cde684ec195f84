//! Request method tokens.

use std::fmt;

use thiserror::Error;

/// A request method: a non-empty, case-sensitive token with no whitespace.
///
/// Unlike a closed enum of well-known methods, this keeps whatever token the
/// client sent (`GET`, `PATCH`, a custom verb) so route registration and
/// the handler resolver can match on it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Method(Box<str>);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MethodError {
    #[error("method token is empty")]
    Empty,
    #[error("method token contains whitespace or control characters")]
    InvalidToken,
}

impl Method {
    pub fn parse(token: &str) -> Result<Method, MethodError> {
        if token.is_empty() {
            return Err(MethodError::Empty);
        }
        if token.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
            return Err(MethodError::InvalidToken);
        }
        Ok(Method(token.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn get() -> Method {
        Method("GET".into())
    }
    pub fn head() -> Method {
        Method("HEAD".into())
    }
    pub fn post() -> Method {
        Method("POST".into())
    }
    pub fn put() -> Method {
        Method("PUT".into())
    }
    pub fn delete() -> Method {
        Method("DELETE".into())
    }
    pub fn options() -> Method {
        Method("OPTIONS".into())
    }
    pub fn patch() -> Method {
        Method("PATCH".into())
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Method {
    /// Infallible conversion for call sites that already know the token is
    /// well-formed (route registration literals). Falls back to a sentinel
    /// on malformed input rather than panicking.
    fn from(s: &str) -> Method {
        Method::parse(s).unwrap_or_else(|_| Method("INVALID".into()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(Method::parse("").is_err());
        assert!(Method::parse("GET POST").is_err());
        assert!(Method::parse("GE\tT").is_err());
    }

    #[test]
    fn is_case_sensitive() {
        assert_ne!(Method::parse("get").unwrap(), Method::parse("GET").unwrap());
    }
}
