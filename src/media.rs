//! Media-type matching for content negotiation.
//!
//! Built on the `mime` crate for type/subtype/parameter structure, with
//! specificity ranking and `Accept` quality-value parsing layered on top —
//! the `mime` crate itself has no notion of either.

use std::str::FromStr;

use mime::Mime;

/// What a handler declares for `consumes` or `produces`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSpec {
    /// Matches only requests carrying no `Content-Type` at all.
    /// Valid only as a `consumes` declaration.
    Nothing,
    /// Matches any request, with or without a body.
    /// Valid only as a `consumes` declaration.
    NothingAndAll,
    /// A concrete or wildcarded media range, e.g. `application/json` or
    /// `text/*`, with optional parameters (e.g. `charset=utf-8`).
    Range(Mime),
}

impl MediaSpec {
    pub fn parse(raw: &str) -> Option<MediaSpec> {
        match raw {
            "NOTHING" => Some(MediaSpec::Nothing),
            "NOTHING_AND_ALL" => Some(MediaSpec::NothingAndAll),
            _ => Mime::from_str(raw).ok().map(MediaSpec::Range),
        }
    }

    /// Specificity rank used to break ties in handler resolution: higher
    /// wins. Concrete type+subtype with more matching parameters beats
    /// `type/*`, which beats `*/*`, which beats `NOTHING_AND_ALL`.
    fn base_rank(&self) -> u8 {
        match self {
            MediaSpec::NothingAndAll => 0,
            MediaSpec::Nothing => 3, // only ever compared against itself
            MediaSpec::Range(m) => {
                if m.type_() == mime::STAR {
                    1
                } else if m.subtype() == mime::STAR {
                    2
                } else {
                    3
                }
            }
        }
    }

    fn param_count(&self) -> usize {
        match self {
            MediaSpec::Range(m) => m.params().count(),
            _ => 0,
        }
    }

    /// A total order over specificity: `(base_rank, matching_param_count)`.
    pub fn specificity(&self) -> (u8, usize) {
        (self.base_rank(), self.param_count())
    }
}

/// Does a request's `Content-Type` `t` satisfy a handler's `consumes`
/// declaration `spec`?
///
/// Parameters declared on `spec` must all be present on `t` (names
/// case-insensitive, values case-sensitive except `charset`); unlisted
/// parameters on `t` are ignored.
pub fn consumes_matches(spec: &MediaSpec, content_type: Option<&Mime>) -> bool {
    match (spec, content_type) {
        (MediaSpec::Nothing, None) => true,
        (MediaSpec::Nothing, Some(_)) => false,
        (MediaSpec::NothingAndAll, _) => true,
        (MediaSpec::Range(_), None) => false,
        (MediaSpec::Range(want), Some(t)) => media_range_matches(want, t),
    }
}

/// Does a `produces` declaration `spec` satisfy one `Accept` range `want`?
pub fn produces_matches(spec: &Mime, want: &Mime) -> bool {
    media_range_matches(want, spec)
}

fn media_range_matches(range: &Mime, concrete: &Mime) -> bool {
    let type_ok = range.type_() == mime::STAR || range.type_() == concrete.type_();
    let subtype_ok = range.subtype() == mime::STAR || range.subtype() == concrete.subtype();
    if !type_ok || !subtype_ok {
        return false;
    }
    range.params().all(|(name, value)| {
        concrete.get_param(name.as_str()).is_some_and(|actual| {
            if name == mime::CHARSET {
                actual.as_str().eq_ignore_ascii_case(value.as_str())
            } else {
                actual.as_str() == value.as_str()
            }
        })
    })
}

/// One entry of a parsed `Accept` header: a media range plus its quality.
#[derive(Debug, Clone)]
pub struct AcceptEntry {
    pub range: Mime,
    pub quality: f32,
}

/// Parses an `Accept` header value into media ranges with quality values.
/// Defaults to `*/*` (q=1.0) when `raw` is absent or empty.
pub fn parse_accept(raw: Option<&str>) -> Vec<AcceptEntry> {
    let raw = match raw {
        Some(r) if !r.trim().is_empty() => r,
        _ => return vec![AcceptEntry { range: mime::STAR_STAR, quality: 1.0 }],
    };
    raw.split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let mut quality = 1.0f32;
            let mut type_part = part;
            if let Some(q_idx) = part.find(";q=").or_else(|| part.find("; q=")) {
                type_part = &part[..q_idx];
                let q_str = &part[q_idx..];
                if let Some(eq) = q_str.find('=') {
                    quality = q_str[eq + 1..].trim().parse().unwrap_or(1.0);
                }
            }
            Mime::from_str(type_part.trim()).ok().map(|range| AcceptEntry { range, quality })
        })
        .collect()
}
