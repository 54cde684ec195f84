//! Case-insensitive, order-preserving header multimap.
//!
//! Lookup is case-insensitive, but the original name casing and insertion
//! order are preserved for exact wire round-trip — a plain `HashMap`
//! would lose both.

use std::fmt;

/// A header name that compares, hashes and looks up case-insensitively but
/// remembers the bytes it was constructed from for echoing back on the wire.
#[derive(Debug, Clone)]
pub struct HeaderName(Box<str>);

impl HeaderName {
    pub fn new(raw: &str) -> HeaderName {
        HeaderName(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for HeaderName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}
impl Eq for HeaderName {}

impl std::hash::Hash for HeaderName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            b.to_ascii_lowercase().hash(state);
        }
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'a> PartialEq<&'a str> for HeaderName {
    fn eq(&self, other: &&'a str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

/// Ordered, case-insensitive, multi-valued header collection.
///
/// Values for a repeated header name are kept in the order they were
/// inserted, and so is the list of distinct name/value pairs as a whole —
/// `iter()` reproduces exactly the wire order a parse produced.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(HeaderName, String)>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers { entries: Vec::new() }
    }

    /// Appends a value, preserving any existing values under the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((HeaderName::new(&name.into()), value.into()));
    }

    /// Replaces all existing values for `name` with a single `value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.append(name, value);
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq(&name));
    }

    /// First value for `name`, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter().find(|(n, _)| n.eq(&name)).map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries.iter().filter(move |(n, _)| n.eq(&name)).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq(&name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &str)> {
        self.entries.iter().map(|(n, v)| (n, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if a `Connection` header carries the `close` token
    /// (case-insensitive, comma-separated list per RFC 7230).
    pub fn has_connection_close(&self) -> bool {
        self.get_all("connection")
            .flat_map(|v| v.split(','))
            .any(|tok| tok.trim().eq_ignore_ascii_case("close"))
    }
}

impl PartialEq for Headers {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((n1, v1), (n2, v2))| n1 == n2 && v1 == v2)
    }
}

pub(crate) fn is_transfer_encoding(name: &str) -> bool {
    name.eq_ignore_ascii_case("transfer-encoding")
}

pub(crate) fn is_content_length(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length")
}

pub(crate) fn is_connection(name: &str) -> bool {
    name.eq_ignore_ascii_case("connection")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut h = Headers::new();
        h.append("Content-Type", "text/plain");
        assert_eq!(h.get("content-TYPE"), Some("text/plain"));
    }

    #[test]
    fn preserves_order_and_case_on_iteration() {
        let mut h = Headers::new();
        h.append("My-Header", "one");
        h.append("Other", "x");
        h.append("My-Header", "two");
        let dumped: Vec<_> = h.iter().map(|(n, v)| (n.as_str().to_string(), v.to_string())).collect();
        assert_eq!(
            dumped,
            vec![
                ("My-Header".into(), "one".into()),
                ("Other".into(), "x".into()),
                ("My-Header".into(), "two".into()),
            ]
        );
    }

    #[test]
    fn detects_connection_close_token() {
        let mut h = Headers::new();
        h.append("Connection", "keep-alive, close");
        assert!(h.has_connection_close());
    }
}
