//! Request path parsing.
//!
//! The inbound surface encodes everything in the path:
//!
//! ```text
//! /{height}x{width}/{source URL, percent-encoded or raw}
//! /100x200/http://example.com/photo.jpg   → 200 wide, 100 high
//! /50x50/example.com/x.jpg                → source http://example.com/x.jpg
//! ```
//!
//! Note the order: height comes first.
//!
//! Source URLs are normalized before anything else sees them, so equivalent
//! spellings share one cache entry:
//!
//! 1. Percent-decode (kept raw if the result is not UTF-8).
//! 2. Repair a scheme whose `//` was collapsed by an intermediary (`http:/host`).
//! 3. Default the scheme to `http` when none is present.
//! 4. Canonicalize with the `url` crate and drop any fragment.
//!
//! Every error message echoes the offending input, since it is returned to
//! the client verbatim with a 400.

use percent_encoding::percent_decode_str;
use std::borrow::Cow;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Wrong arguments ({0}): expected /{{height}}x{{width}}/{{url}}")]
    WrongArguments(String),
    #[error("Failed parsing size ({0}): expected {{height}}x{{width}}")]
    Size(String),
    #[error("Invalid size ({0}): width and height must be greater than zero")]
    ZeroDimension(String),
    #[error("Invalid size ({size}): width and height must be at most {max}")]
    TooLarge { size: String, max: u32 },
    #[error("Failed parsing url ({input}): {reason}")]
    Url { input: String, reason: String },
}

/// One parsed request: what to fetch and the box to crop it to.
///
/// Transient; never persisted. See [`CachedArtifact`](crate::store::CachedArtifact)
/// for the stored form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub source_url: Url,
    pub width: u32,
    pub height: u32,
}

impl ImageRequest {
    /// Build a request from an already-normalized URL.
    pub fn new(source_url: Url, width: u32, height: u32) -> Result<Self, RequestError> {
        if width == 0 || height == 0 {
            return Err(RequestError::ZeroDimension(format!("{height}x{width}")));
        }
        Ok(Self {
            source_url,
            width,
            height,
        })
    }

    /// Parse a request path (and the raw query string, if any).
    ///
    /// The leading `/` is optional. A query string on the inbound request is
    /// appended to the source URL: an unencoded source such as
    /// `http://a/b.jpg?v=2` reaches us split at the `?`.
    pub fn from_path(
        path: &str,
        query: Option<&str>,
        max_dimension: u32,
    ) -> Result<Self, RequestError> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let (size, source) = trimmed
            .split_once('/')
            .filter(|(size, source)| !size.is_empty() && !source.is_empty())
            .ok_or_else(|| RequestError::WrongArguments(path.to_string()))?;

        let (height, width) = parse_size(size)?;
        if width > max_dimension || height > max_dimension {
            return Err(RequestError::TooLarge {
                size: size.to_string(),
                max: max_dimension,
            });
        }

        let mut source_url = normalize_source_url(source)?;
        if let Some(extra) = query.filter(|q| !q.is_empty()) {
            let merged = match source_url.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{extra}"),
                _ => extra.to_string(),
            };
            source_url.set_query(Some(&merged));
        }

        Self::new(source_url, width, height)
    }
}

/// Parse `{height}x{width}` into `(height, width)`.
fn parse_size(size: &str) -> Result<(u32, u32), RequestError> {
    let err = || RequestError::Size(size.to_string());
    let (h, w) = size.split_once('x').ok_or_else(err)?;
    let height: u32 = h.parse().map_err(|_| err())?;
    let width: u32 = w.parse().map_err(|_| err())?;
    if width == 0 || height == 0 {
        return Err(RequestError::ZeroDimension(size.to_string()));
    }
    Ok((height, width))
}

/// Normalize a raw path segment into an absolute `http`/`https` URL.
pub fn normalize_source_url(raw: &str) -> Result<Url, RequestError> {
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .unwrap_or(Cow::Borrowed(raw));
    let repaired = repair_collapsed_scheme(&decoded);

    let candidate = if has_scheme_and_authority(&repaired) {
        repaired.into_owned()
    } else {
        format!("http://{}", repaired.trim_start_matches('/'))
    };

    let url_err = |reason: String| RequestError::Url {
        input: raw.to_string(),
        reason,
    };
    let mut url = Url::parse(&candidate).map_err(|e| url_err(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(url_err(format!("unsupported scheme '{other}'"))),
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(url_err("missing host".into()));
    }
    url.set_fragment(None);
    Ok(url)
}

/// `http:/example.com` → `http://example.com` (some proxies merge slashes).
fn repair_collapsed_scheme(s: &str) -> Cow<'_, str> {
    for scheme in ["http:/", "https:/"] {
        let Some(head) = s.get(..scheme.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(scheme) {
            continue;
        }
        let rest = &s[scheme.len()..];
        if !rest.is_empty() && !rest.starts_with('/') {
            return Cow::Owned(format!("{head}/{rest}"));
        }
    }
    Cow::Borrowed(s)
}

/// True when `s` starts with `scheme://`. A bare `host:port/path` is not.
fn has_scheme_and_authority(s: &str) -> bool {
    s.split_once("://").is_some_and(|(scheme, _)| {
        scheme.starts_with(|c: char| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    })
}
