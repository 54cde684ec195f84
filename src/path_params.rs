//! Path-parameter view: only the parameter names declared by the pattern
//! of the *currently executing* entity are visible; accessing an
//! undeclared key fails precisely instead of silently returning `None`,
//! so a before-action bound to `/a/:x` can't accidentally read a `:y` that
//! only the route itself declares.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathParamError {
    #[error("path parameter `{0}` was not declared by this pattern")]
    Undeclared(String),
}

/// All path parameters captured for the matched route, each carrying both
/// the raw (percent-encoded) and decoded form. [`PathParams::scoped`]
/// restricts visibility to whichever entity is currently executing.
#[derive(Debug, Clone, Default)]
pub struct PathParams {
    values: HashMap<String, (String, String)>, // name -> (raw, decoded)
}

impl PathParams {
    pub fn new() -> PathParams {
        PathParams::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, raw: impl Into<String>, decoded: impl Into<String>) {
        self.values.insert(name.into(), (raw.into(), decoded.into()));
    }

    /// A view scoped to only the names in `declared` — the pattern of
    /// whichever before-action, handler, or after-action is executing now.
    pub fn scoped<'a>(&'a self, declared: &'a [String]) -> ScopedPathParams<'a> {
        ScopedPathParams { all: self, declared }
    }
}

pub struct ScopedPathParams<'a> {
    all: &'a PathParams,
    declared: &'a [String],
}

impl<'a> ScopedPathParams<'a> {
    pub fn decoded(&self, name: &str) -> Result<&str, PathParamError> {
        if !self.declared.iter().any(|d| d == name) {
            return Err(PathParamError::Undeclared(name.to_string()));
        }
        Ok(self
            .all
            .values
            .get(name)
            .map(|(_, decoded)| decoded.as_str())
            .expect("declared name must have been captured by the matcher"))
    }

    pub fn raw(&self, name: &str) -> Result<&str, PathParamError> {
        if !self.declared.iter().any(|d| d == name) {
            return Err(PathParamError::Undeclared(name.to_string()));
        }
        Ok(self.all.values.get(name).map(|(raw, _)| raw.as_str()).expect(
            "declared name must have been captured by the matcher",
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn undeclared_name_is_an_error_even_if_present() {
        let mut all = PathParams::new();
        all.insert("name", "John", "John");
        let declared = vec!["other".to_string()];
        let view = all.scoped(&declared);
        assert_eq!(view.decoded("name"), Err(PathParamError::Undeclared("name".into())));
    }

    #[test]
    fn declared_name_resolves() {
        let mut all = PathParams::new();
        all.insert("name", "John%20Doe", "John Doe");
        let declared = vec!["name".to_string()];
        let view = all.scoped(&declared);
        assert_eq!(view.decoded("name"), Ok("John Doe"));
        assert_eq!(view.raw("name"), Ok("John%20Doe"));
    }
}
