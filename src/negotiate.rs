//! Handler resolver: filters a route's handler set by method,
//! `Content-Type`, and `Accept`, then orders survivors by
//! `(client q desc, consumes specificity desc, produces specificity desc)`.

use mime::Mime;
use thiserror::Error;

use crate::media::{self, AcceptEntry, MediaSpec};
use crate::method::Method;
use crate::route::{HandlerEntry, Route};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("route matched but no handler accepts the request method")]
    MethodNotAllowed { allowed: Vec<Method> },
    #[error("no handler produces a representation the client accepts")]
    NoHandlerResolvedNotAcceptable,
    #[error("no handler consumes the request's content type")]
    NoHandlerResolvedUnsupportedMedia,
    #[error("more than one handler tied for this request")]
    AmbiguousHandler,
}

struct Candidate<'a> {
    entry: &'a HandlerEntry,
    client_q: f32,
}

/// Resolves the unique best handler on `route` for `method`/`content_type`/
/// `accept_header`, by filtering on method, then `consumes`, then `Accept`,
/// and ordering the survivors.
///
/// `accept_header` is the raw `Accept` header value, or `None` if the
/// client sent none at all. The distinction matters for tie-breaking: a
/// client that states no preference gets the first-registered producer
/// among otherwise-tied candidates; a client whose explicit `Accept` still
/// leaves two candidates equally preferred is `AmbiguousHandler`.
pub fn resolve<'a>(
    route: &'a Route,
    method: &Method,
    content_type: Option<&Mime>,
    accept_header: Option<&str>,
) -> Result<&'a HandlerEntry, ResolveError> {
    if route.handlers.is_empty() {
        return Err(ResolveError::MethodNotAllowed { allowed: Vec::new() });
    }

    let by_method: Vec<&HandlerEntry> = route.handlers.iter().filter(|h| &h.method == method).collect();
    if by_method.is_empty() {
        let allowed = route.handlers.iter().map(|h| h.method.clone()).collect();
        return Err(ResolveError::MethodNotAllowed { allowed });
    }

    let by_consumes: Vec<&HandlerEntry> = by_method.into_iter().filter(|h| media::consumes_matches(&h.consumes, content_type)).collect();
    if by_consumes.is_empty() {
        return Err(ResolveError::NoHandlerResolvedUnsupportedMedia);
    }

    let accept: Vec<AcceptEntry> = media::parse_accept(accept_header);
    let client_stated_a_preference = accept_header.is_some_and(|raw| !raw.trim().is_empty());

    let mut candidates: Vec<(usize, Candidate<'a>)> = Vec::new();
    for (original_index, entry) in by_consumes.into_iter().enumerate() {
        let mut best_q: Option<f32> = None;
        for range in &accept {
            if !media::produces_matches(&entry.produces, &range.range) {
                continue;
            }
            if range.quality == 0.0 {
                // an explicit q=0 on a matching range eliminates the
                // candidate outright, even if another range would match.
                best_q = None;
                break;
            }
            best_q = Some(best_q.map_or(range.quality, |b| b.max(range.quality)));
        }
        if let Some(q) = best_q {
            candidates.push((original_index, Candidate { entry, client_q: q }));
        }
    }
    if candidates.is_empty() {
        return Err(ResolveError::NoHandlerResolvedNotAcceptable);
    }

    candidates.sort_by(|(_, a), (_, b)| {
        b.client_q
            .partial_cmp(&a.client_q)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.entry.consumes.specificity().cmp(&a.entry.consumes.specificity()))
            .then_with(|| {
                let a_spec = MediaSpec::Range(a.entry.produces.clone()).specificity();
                let b_spec = MediaSpec::Range(b.entry.produces.clone()).specificity();
                b_spec.cmp(&a_spec)
            })
    });

    let (_, best) = &candidates[0];
    let tied_indices: Vec<usize> = std::iter::once(candidates[0].0)
        .chain(candidates.iter().skip(1).take_while(|(_, c)| {
            c.client_q == best.client_q
                && c.entry.consumes.specificity() == best.entry.consumes.specificity()
                && MediaSpec::Range(c.entry.produces.clone()).specificity() == MediaSpec::Range(best.entry.produces.clone()).specificity()
        }).map(|(i, _)| *i))
        .collect();

    if tied_indices.len() > 1 {
        if client_stated_a_preference {
            return Err(ResolveError::AmbiguousHandler);
        }
        // No explicit client preference: fall back to the first-registered
        // candidate among the tied set.
        let winner_index = *tied_indices.iter().min().unwrap();
        return Ok(candidates.iter().find(|(i, _)| *i == winner_index).unwrap().1.entry);
    }

    Ok(candidates[0].1.entry)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::request::Request;
    use crate::response::Response;
    use crate::route::sync_handler;
    use crate::status::StatusCode;
    use std::str::FromStr;

    fn handler(method: Method, consumes: MediaSpec, produces: &str) -> HandlerEntry {
        HandlerEntry {
            method,
            consumes,
            produces: Mime::from_str(produces).unwrap(),
            handler: sync_handler(|_: &Request| Response::builder(StatusCode::OK).build()),
        }
    }

    fn route_with(handlers: Vec<HandlerEntry>) -> Route {
        Route { pattern: Vec::new(), param_names: Vec::new(), handlers }
    }

    #[test]
    fn accept_header_selects_json_over_plain() {
        let route = route_with(vec![
            handler(Method::get(), MediaSpec::NothingAndAll, "text/plain"),
            handler(Method::get(), MediaSpec::NothingAndAll, "application/json"),
        ]);
        let found = resolve(&route, &Method::get(), None, Some("application/json")).unwrap();
        assert_eq!(found.produces.to_string(), "application/json");
    }

    #[test]
    fn missing_accept_selects_the_first_registered_handler() {
        let route = route_with(vec![
            handler(Method::get(), MediaSpec::NothingAndAll, "text/plain"),
            handler(Method::get(), MediaSpec::NothingAndAll, "application/json"),
        ]);
        let found = resolve(&route, &Method::get(), None, None).unwrap();
        assert_eq!(found.produces.to_string(), "text/plain");
    }

    #[test]
    fn an_explicit_tie_in_the_accept_header_is_ambiguous() {
        let route = route_with(vec![
            handler(Method::get(), MediaSpec::NothingAndAll, "text/plain"),
            handler(Method::get(), MediaSpec::NothingAndAll, "application/json"),
        ]);
        let err = resolve(&route, &Method::get(), None, Some("*/*")).unwrap_err();
        assert_eq!(err, ResolveError::AmbiguousHandler);
    }

    #[test]
    fn q_zero_eliminates_a_candidate() {
        let route = route_with(vec![
            handler(Method::get(), MediaSpec::NothingAndAll, "text/plain"),
            handler(Method::get(), MediaSpec::NothingAndAll, "application/json"),
        ]);
        let found = resolve(&route, &Method::get(), None, Some("*/*;q=0.5, text/*;q=0")).unwrap();
        assert_eq!(found.produces.to_string(), "application/json");
    }

    #[test]
    fn unknown_method_reports_the_allowed_set() {
        let route = route_with(vec![handler(Method::get(), MediaSpec::NothingAndAll, "text/plain")]);
        let err = resolve(&route, &Method::post(), None, None).unwrap_err();
        assert_eq!(err, ResolveError::MethodNotAllowed { allowed: vec![Method::get()] });
    }
}
